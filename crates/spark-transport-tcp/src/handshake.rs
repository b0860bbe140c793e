//! 自定义握手协议：身份、标志位、版本与异步参数的交换。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 两端在复用同一条 TCP 连接收发域消息之前，必须先确认协议版本兼容、交换
//!   对端身份，并且（对于接收方一侧）把本地的异步队列阈值告知发送方，这样
//!   发送方才能在本地正确判断何时从同步路径切换到队列路径。
//!
//! ## 逻辑解析（How）
//! - 发起方（initiator）写入保留字节 `0x00`、握手版本、序列化的本地成员身份、
//!   `shared`/`preserveOrder` 标志、64 位 `uniqueId`、本地协议版本序号与
//!   `dominoCount + 1`，整帧以 `NO_MSG_ID` 包裹一个普通消息头。
//! - 接收方（acceptor）读取并校验保留字节与握手版本，保存对端身份/标志/
//!   uniqueId/版本，然后回复 *OK*（单字节 69）或 *OK-with-async-info*
//!   （69 之外的 70，外加三组 32 位异步阈值与自身协议版本序号）。

use crate::collaborators::MemberIdentity;
use crate::config::EngineConfig;
use crate::error::{map_io_error, protocol_error, HANDSHAKE};
use crate::framing::{self, MessageType, HEADER_LEN, NO_MSG_ID};
use crate::io_filter::IoFilter;
use bytes::{Buf, BufMut, BytesMut};
use spark_core::prelude::{CoreError, Result};

/// 保留字节的期望值；非零表示对端是不兼容的旧版本。
const RESERVED_BYTE: u8 = 0x00;

/// 握手回复码：单字节 OK。
pub const REPLY_OK: u8 = 69;
/// 握手回复码：携带异步参数的 OK。
pub const REPLY_OK_WITH_ASYNC_INFO: u8 = 70;

/// 一次握手中随发起方连接请求发送的全部字段。
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    pub local_identity: MemberIdentity,
    pub shared: bool,
    pub preserve_order: bool,
    pub unique_id: u64,
    pub product_version: u32,
    pub domino_count: u32,
}

/// 接收方在握手成功后记录的、关于对端的全部信息。
#[derive(Debug, Clone)]
pub struct HandshakeInfo {
    pub remote_identity: MemberIdentity,
    pub shared: bool,
    pub preserve_order: bool,
    pub unique_id: u64,
    pub remote_product_version: u32,
    pub domino_count: u32,
}

/// 接收方回复中携带的异步队列参数（已由发起方从 MiB 换算为字节）。
#[derive(Debug, Clone, Copy)]
pub struct AsyncInfo {
    pub async_distribution_timeout_ms: u32,
    pub async_queue_timeout_ms: u32,
    pub async_max_queue_size_bytes: u64,
    pub acceptor_product_version: u32,
}

/// 发起方从接收方收到的握手结果。
#[derive(Debug, Clone)]
pub struct HandshakeReply {
    pub async_info: Option<AsyncInfo>,
}

fn encode_request(req: &HandshakeRequest) -> BytesMut {
    let mut body = BytesMut::new();
    body.put_u8(RESERVED_BYTE);
    body.put_u8(framing::HANDSHAKE_VERSION);
    body.put_u32(req.local_identity.len() as u32);
    body.put_slice(&req.local_identity);
    body.put_u8(req.shared as u8);
    body.put_u8(req.preserve_order as u8);
    body.put_u64(req.unique_id);
    body.put_u32(req.product_version);
    body.put_u32(req.domino_count + 1);

    let mut frame = BytesMut::new();
    framing::encode_header(MessageType::Normal, false, NO_MSG_ID, body.len() as u32, &mut frame)
        .expect("handshake body never exceeds the max frame payload");
    frame.extend_from_slice(&body);
    frame
}

/// 发起方：在已连接的 socket 上写出握手请求，并阻塞等待接收方回复。
///
/// `config.handshake_timeout` 由调用方通过外部的超时包装（例如
/// `tokio::time::timeout`）实现；本函数本身不施加超时，只负责协议字节交换。
pub async fn perform_initiator_handshake(
    filter: &mut IoFilter,
    req: HandshakeRequest,
) -> Result<HandshakeReply, CoreError> {
    let frame = encode_request(&req);
    filter.write_all(&frame).await.map_err(|e| map_io_error(HANDSHAKE, e))?;

    let mut header_buf = [0u8; HEADER_LEN];
    read_exact(filter, &mut header_buf).await?;
    let mut cursor = &header_buf[..];
    let header = framing::decode_header(&mut cursor)?;
    if header.message_type != MessageType::Normal {
        return Err(protocol_error("handshake reply framed with non-normal message type"));
    }

    let mut payload = vec![0u8; header.payload_len as usize];
    read_exact(filter, &mut payload).await?;
    let mut cursor = &payload[..];
    if cursor.remaining() < 1 {
        return Err(protocol_error("handshake reply missing reply code"));
    }
    let reply_code = cursor.get_u8();
    let async_info = match reply_code {
        REPLY_OK => None,
        REPLY_OK_WITH_ASYNC_INFO => {
            if cursor.remaining() < 16 {
                return Err(protocol_error("truncated OK-with-async-info reply"));
            }
            Some(AsyncInfo {
                async_distribution_timeout_ms: cursor.get_u32(),
                async_queue_timeout_ms: cursor.get_u32(),
                async_max_queue_size_bytes: (cursor.get_u32() as u64) * 1024 * 1024,
                acceptor_product_version: cursor.get_u32(),
            })
        }
        other => return Err(protocol_error(format!("unrecognized handshake reply code {other}"))),
    };

    Ok(HandshakeReply { async_info })
}

/// 接收方：读取发起方的握手请求，校验后返回对端信息。回复的发送由调用方
/// 另行调用 [`send_acceptor_reply`]，以便在回复前插入成员校验等待（安全模式）。
pub async fn read_initiator_request(filter: &mut IoFilter) -> Result<HandshakeInfo, CoreError> {
    let mut header_buf = [0u8; HEADER_LEN];
    read_exact(filter, &mut header_buf).await?;
    let mut cursor = &header_buf[..];
    let header = framing::decode_header(&mut cursor)?;
    if header.message_type != MessageType::Normal {
        return Err(protocol_error("handshake request framed with non-normal message type"));
    }

    let mut payload = vec![0u8; header.payload_len as usize];
    read_exact(filter, &mut payload).await?;
    let mut cursor = &payload[..];

    if cursor.remaining() < 2 {
        return Err(protocol_error("truncated handshake request"));
    }
    let reserved = cursor.get_u8();
    if reserved != RESERVED_BYTE {
        return Err(protocol_error(
            "handshake reserved byte non-zero: peer is an incompatible legacy version",
        ));
    }
    let version = cursor.get_u8();
    if version != framing::HANDSHAKE_VERSION {
        return Err(protocol_error(format!(
            "handshake version mismatch: peer sent {version}, expected {}",
            framing::HANDSHAKE_VERSION
        )));
    }

    if cursor.remaining() < 4 {
        return Err(protocol_error("truncated handshake identity length"));
    }
    let identity_len = cursor.get_u32() as usize;
    if cursor.remaining() < identity_len {
        return Err(protocol_error("truncated handshake identity payload"));
    }
    let remote_identity = cursor.copy_to_bytes(identity_len).to_vec();

    if cursor.remaining() < 18 {
        return Err(protocol_error("truncated handshake trailer"));
    }
    let shared = cursor.get_u8() != 0;
    let preserve_order = cursor.get_u8() != 0;
    let unique_id = cursor.get_u64();
    let remote_product_version = cursor.get_u32();
    let domino_count = cursor.get_u32();

    Ok(HandshakeInfo {
        remote_identity,
        shared,
        preserve_order,
        unique_id,
        remote_product_version,
        domino_count,
    })
}

/// 接收方：发送 OK 或 OK-with-async-info 回复。
pub async fn send_acceptor_reply(
    filter: &mut IoFilter,
    config: &EngineConfig,
    acceptor_product_version: u32,
) -> Result<(), CoreError> {
    let mut body = BytesMut::new();
    if config.async_distribution_timeout.is_zero() {
        body.put_u8(REPLY_OK);
    } else {
        body.put_u8(REPLY_OK_WITH_ASYNC_INFO);
        body.put_u32(config.async_distribution_timeout.as_millis() as u32);
        body.put_u32(config.async_queue_timeout.as_millis() as u32);
        body.put_u32((config.async_max_queue_size / (1024 * 1024)) as u32);
        body.put_u32(acceptor_product_version);
    }

    let mut frame = BytesMut::new();
    framing::encode_header(MessageType::Normal, false, NO_MSG_ID, body.len() as u32, &mut frame)
        .expect("handshake reply body never exceeds the max frame payload");
    frame.extend_from_slice(&body);
    filter.write_all(&frame).await.map_err(|e| map_io_error(HANDSHAKE, e))
}

async fn read_exact(filter: &mut IoFilter, buf: &mut [u8]) -> Result<(), CoreError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = filter
            .read(&mut buf[filled..])
            .await
            .map_err(|e| map_io_error(HANDSHAKE, e))?;
        if n == 0 {
            return Err(protocol_error("peer closed socket mid-handshake"));
        }
        filled += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (accept_result, connect_result) = tokio::join!(listener.accept(), connect);
        (accept_result.unwrap().0, connect_result.unwrap())
    }

    #[tokio::test]
    async fn happy_handshake_negotiates_async_info() {
        let (server, client) = loopback_pair().await;
        let mut acceptor_filter = IoFilter::plain(server);
        let mut initiator_filter = IoFilter::plain(client);

        let config = EngineConfig::new();
        let req = HandshakeRequest {
            local_identity: b"initiator".to_vec(),
            shared: true,
            preserve_order: true,
            unique_id: 42,
            product_version: 1,
            domino_count: 0,
        };

        let (initiator_result, acceptor_result) = tokio::join!(
            perform_initiator_handshake(&mut initiator_filter, req),
            async {
                let info = read_initiator_request(&mut acceptor_filter).await.unwrap();
                send_acceptor_reply(&mut acceptor_filter, &config, 2).await.unwrap();
                info
            }
        );

        let acceptor_info = acceptor_result;
        assert_eq!(acceptor_info.remote_identity, b"initiator");
        assert_eq!(acceptor_info.unique_id, 42);
        assert_eq!(acceptor_info.domino_count, 1); // domino count + 1 as sent on the wire

        let reply = initiator_result.unwrap();
        let async_info = reply.async_info.expect("non-zero asyncDistributionTimeout yields async info");
        assert_eq!(async_info.acceptor_product_version, 2);
        assert_eq!(
            async_info.async_max_queue_size_bytes,
            (config.async_max_queue_size / (1024 * 1024)) * 1024 * 1024
        );
    }

    #[tokio::test]
    async fn acceptor_rejects_nonzero_reserved_byte() {
        let (server, mut client) = loopback_pair().await;
        let mut acceptor_filter = IoFilter::plain(server);

        let mut bogus = BytesMut::new();
        bogus.put_u8(0x01); // non-zero reserved byte: incompatible legacy peer
        bogus.put_u8(framing::HANDSHAKE_VERSION);
        let mut frame = BytesMut::new();
        framing::encode_header(MessageType::Normal, false, NO_MSG_ID, bogus.len() as u32, &mut frame).unwrap();
        frame.extend_from_slice(&bogus);
        tokio::io::AsyncWriteExt::write_all(&mut client, &frame).await.unwrap();

        let err = read_initiator_request(&mut acceptor_filter).await.unwrap_err();
        assert!(err.message().contains("reserved byte"));
    }
}
