//! 读者状态机：驱动阻塞读循环，拆帧并分发或累积分块；direct-ack 快速读取路径。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 接收方连接需要一个长驻任务持续从 socket 读取字节、拆出完整消息并投递
//!   给上游分发器；发起方连接则完全不需要这个长驻循环——它只在发出一条
//!   携带直接 ack 标志的消息后，同步读取一次回复。把两者分开实现，避免
//!   发起方连接为从不会用到的常驻读循环付出线程/任务开销。
//!
//! ## 逻辑解析（How）
//! - `run_reader_loop` 针对接收方：每轮迭代把状态置为 `Reading`、调用一次
//!   `filter.read`；返回 0 视为 EOF 并退出。读到的字节追加进输入缓冲后，
//!   `drain_frames` 反复尝试从缓冲头部解出完整帧：普通消息直接组装投递；
//!   分块消息按 `message_id` 累积，final-chunk 到达时拼接全部分块后投递。
//! - `read_ack` 针对发起方的直接 ack 回复：状态 `Sending → PostSending →
//!   ReadingAck → ReceivedAck`，读到一个头部后按类型直接解析（不经过
//!   `drain_frames`/上游分发器），是一条文档化的优化路径。

use crate::collaborators::{InboundMessage, UpstreamDispatcher};
use crate::connection::Connection;
use crate::error::{map_io_error, protocol_error, READ};
use crate::framing::{self, FrameHeader, MessageType, HEADER_LEN};
use crate::io_filter::IoReadHalf;
use crate::state::ConnectionState;
use bytes::{Buf, BytesMut};
use spark_core::prelude::{CoreError, PooledBuffer};
use std::collections::HashMap;
use std::sync::Arc;

/// 为何读循环退出；用于连接决定关闭级联的 `reason`。
#[derive(Debug)]
pub enum ReaderExit {
    Eof,
    Error(CoreError),
    Cancelled,
}

struct ChunkAccumulator {
    parts: HashMap<u16, BytesMut>,
}

impl ChunkAccumulator {
    fn new() -> Self {
        Self { parts: HashMap::new() }
    }

    fn append(&mut self, message_id: u16, bytes: &[u8]) {
        self.parts.entry(message_id).or_default().extend_from_slice(bytes);
    }

    fn finish(&mut self, message_id: u16, bytes: &[u8]) -> BytesMut {
        let mut assembled = self.parts.remove(&message_id).unwrap_or_default();
        assembled.extend_from_slice(bytes);
        assembled
    }
}

/// 尝试从缓冲中解出并分发尽可能多的完整帧；返回已消费的字节数。
fn drain_frames(
    connection: &Arc<Connection>,
    dispatcher: &dyn UpstreamDispatcher,
    input: &mut BytesMut,
    accumulator: &mut ChunkAccumulator,
) -> Result<(), CoreError> {
    loop {
        if input.len() < HEADER_LEN {
            return Ok(());
        }
        let header: FrameHeader = {
            let mut peek = &input[..];
            framing::decode_header(&mut peek)?
        };
        let total_len = HEADER_LEN + header.payload_len as usize;
        if input.len() < total_len {
            return Ok(());
        }

        input.advance(HEADER_LEN);
        let payload = input.split_to(header.payload_len as usize);

        match header.message_type {
            MessageType::Normal => {
                dispatch_completed(connection, dispatcher, header, payload.to_vec());
            }
            MessageType::Chunk => {
                accumulator.append(header.message_id, &payload);
            }
            MessageType::FinalChunk => {
                let assembled = accumulator.finish(header.message_id, &payload);
                dispatch_completed(connection, dispatcher, header, assembled.to_vec());
            }
        }
    }
}

fn dispatch_completed(
    connection: &Arc<Connection>,
    dispatcher: &dyn UpstreamDispatcher,
    header: FrameHeader,
    payload: Vec<u8>,
) {
    let bytes_read = payload.len();
    let direct_ack = header.direct_ack;
    let message_id = header.message_id;
    connection.stats().inc_messages_received(1);
    let message = InboundMessage { message_id, direct_ack, payload };
    // The dispatcher, not the engine, owns writing any direct-ack reply — it holds the
    // connection handle passed alongside the message and calls `Connection::send` itself
    // when it accepts ack responsibility. A `false` return here means no reply will be
    // attempted at all (e.g. the sender was shunned between send and receipt).
    let accepted_ack = dispatcher.message_received(connection, message, bytes_read);
    if direct_ack && !accepted_ack {
        tracing::debug!(connection_id = connection.id(), message_id, "direct-ack suppressed: dispatcher refused ack responsibility");
    }
}

/// 接收方读循环：持续读取直到 EOF、取消或不可恢复错误。
pub async fn run_reader_loop(
    connection: Arc<Connection>,
    mut read_half: IoReadHalf,
    mut input: PooledBuffer,
    dispatcher: Arc<dyn UpstreamDispatcher>,
) -> (ReaderExit, PooledBuffer) {
    let mut accumulator = ChunkAccumulator::new();
    let mut read_chunk = vec![0u8; 8192];

    loop {
        if connection.is_closing() {
            return (ReaderExit::Cancelled, input);
        }

        connection.state().set(ConnectionState::Reading);
        let n = match read_half.read(&mut read_chunk).await {
            Ok(n) => n,
            Err(e) => return (ReaderExit::Error(map_io_error(READ, e)), input),
        };
        connection.state().set(ConnectionState::Idle);

        if n == 0 {
            return (ReaderExit::Eof, input);
        }

        input.bytes_mut().extend_from_slice(&read_chunk[..n]);
        if let Err(e) = drain_frames(&connection, dispatcher.as_ref(), input.bytes_mut(), &mut accumulator) {
            return (ReaderExit::Error(e), input);
        }
    }
}

/// 发起方的直接 ack 读取：状态 `Sending → PostSending → ReadingAck → ReceivedAck`。
pub async fn read_ack(connection: &Arc<Connection>, read_half: &mut IoReadHalf) -> Result<Vec<u8>, CoreError> {
    connection.state().set(ConnectionState::PostSending);
    connection.state().set(ConnectionState::ReadingAck);

    let mut accumulator = ChunkAccumulator::new();
    let assembled = loop {
        let mut header_buf = [0u8; HEADER_LEN];
        read_exact(read_half, &mut header_buf).await?;
        let mut cursor = &header_buf[..];
        let header = framing::decode_header(&mut cursor)?;

        let mut payload = vec![0u8; header.payload_len as usize];
        read_exact(read_half, &mut payload).await?;

        match header.message_type {
            MessageType::Normal => break payload,
            MessageType::Chunk => {
                accumulator.append(header.message_id, &payload);
                continue;
            }
            MessageType::FinalChunk => break accumulator.finish(header.message_id, &payload).to_vec(),
        }
    };

    connection.state().set(ConnectionState::ReceivedAck);
    // The ack this connection was waiting on has arrived: stop the periodic ack-wait
    // monitor from escalating against a connection that already succeeded.
    connection.clear_ack_timer();
    Ok(assembled)
}

async fn read_exact(read_half: &mut IoReadHalf, buf: &mut [u8]) -> Result<(), CoreError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = read_half.read(&mut buf[filled..]).await.map_err(|e| map_io_error(READ, e))?;
        if n == 0 {
            return Err(protocol_error("peer closed socket while reading direct-ack reply"));
        }
        filled += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{Collaborators, MembershipContract};
    use crate::config::EngineConfig;
    use crate::test_support::{CountingStats, MockConnectionTable, MockDispatcher, MockMembership};
    use bytes::BufMut;

    fn test_collaborators() -> (Collaborators, Arc<MockDispatcher>) {
        let dispatcher = Arc::new(MockDispatcher::default());
        let collaborators = Collaborators {
            membership: Arc::new(MockMembership::new(b"local".to_vec())),
            table: Arc::new(MockConnectionTable::default()),
            dispatcher: dispatcher.clone(),
            stats: Arc::new(CountingStats::default()),
            ack_groups: Arc::new(crate::ack_timer::AckGroupRegistry::new()),
        };
        (collaborators, dispatcher)
    }

    #[test]
    fn chunked_message_assembles_in_order() {
        let (collaborators, dispatcher) = test_collaborators();
        let connection = Connection::new_for_test(1, collaborators, EngineConfig::new());

        let mut input = BytesMut::new();
        framing::encode_header(MessageType::Chunk, false, 42, 1000, &mut input).unwrap();
        input.put_bytes(b'a', 1000);
        framing::encode_header(MessageType::Chunk, false, 42, 1000, &mut input).unwrap();
        input.put_bytes(b'b', 1000);
        framing::encode_header(MessageType::FinalChunk, false, 42, 500, &mut input).unwrap();
        input.put_bytes(b'c', 500);

        let mut accumulator = ChunkAccumulator::new();
        drain_frames(&connection, dispatcher.as_ref(), &mut input, &mut accumulator).unwrap();

        let received = dispatcher.received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].payload.len(), 2500);
        assert_eq!(received[0].message_id, 42);
    }

    #[test]
    fn completed_messages_are_counted_in_statistics() {
        let dispatcher = Arc::new(MockDispatcher::default());
        let stats = Arc::new(CountingStats::default());
        let collaborators = Collaborators {
            membership: Arc::new(MockMembership::new(b"local".to_vec())),
            table: Arc::new(MockConnectionTable::default()),
            dispatcher: dispatcher.clone(),
            stats: stats.clone(),
            ack_groups: Arc::new(crate::ack_timer::AckGroupRegistry::new()),
        };
        let connection = Connection::new_for_test(9, collaborators, EngineConfig::new());

        let mut input = BytesMut::new();
        framing::encode_header(MessageType::Normal, false, framing::NO_MSG_ID, 3, &mut input).unwrap();
        input.put_slice(b"abc");
        framing::encode_header(MessageType::Normal, false, framing::NO_MSG_ID, 3, &mut input).unwrap();
        input.put_slice(b"def");

        let mut accumulator = ChunkAccumulator::new();
        drain_frames(&connection, dispatcher.as_ref(), &mut input, &mut accumulator).unwrap();

        assert_eq!(stats.messages_received.load(std::sync::atomic::Ordering::Relaxed), 2);
    }

    #[test]
    fn direct_ack_cleared_when_dispatcher_refuses() {
        let dispatcher = Arc::new(MockDispatcher::refusing_ack());
        let collaborators = Collaborators {
            membership: Arc::new(MockMembership::new(b"local".to_vec())),
            table: Arc::new(MockConnectionTable::default()),
            dispatcher: dispatcher.clone(),
            stats: Arc::new(CountingStats::default()),
            ack_groups: Arc::new(crate::ack_timer::AckGroupRegistry::new()),
        };
        let connection = Connection::new_for_test(2, collaborators, EngineConfig::new());

        let mut input = BytesMut::new();
        framing::encode_header(MessageType::Normal, true, framing::NO_MSG_ID, 3, &mut input).unwrap();
        input.put_slice(b"abc");

        let mut accumulator = ChunkAccumulator::new();
        drain_frames(&connection, dispatcher.as_ref(), &mut input, &mut accumulator).unwrap();
        assert_eq!(dispatcher.received.lock().len(), 1);
    }

    async fn loopback_pair() -> (tokio::net::TcpStream, tokio::net::TcpStream) {
        use tokio::net::{TcpListener, TcpStream};
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (accept_result, connect_result) = tokio::join!(listener.accept(), connect);
        (accept_result.unwrap().0, connect_result.unwrap())
    }

    #[tokio::test]
    async fn read_ack_assembles_a_reply_spanning_chunk_and_final_chunk_frames() {
        use crate::io_filter::IoFilter;

        let (server, client) = loopback_pair().await;
        let (mut client_read_half, _client_write_half) = IoFilter::Plain(client).split();

        let mut wire = BytesMut::new();
        framing::encode_header(MessageType::Chunk, false, 9, 1000, &mut wire).unwrap();
        wire.put_bytes(b'a', 1000);
        framing::encode_header(MessageType::Chunk, false, 9, 1000, &mut wire).unwrap();
        wire.put_bytes(b'b', 1000);
        framing::encode_header(MessageType::FinalChunk, false, 9, 500, &mut wire).unwrap();
        wire.put_bytes(b'c', 500);

        let mut server_write_half = IoFilter::Plain(server).split().1;
        let writer = tokio::spawn(async move {
            server_write_half.write_all(&wire).await.unwrap();
        });

        let (collaborators, _dispatcher) = test_collaborators();
        let connection = Connection::new_for_test(3, collaborators, EngineConfig::new());
        connection.start_ack_timer(1, &crate::ack_timer::AckGroupRegistry::new());
        assert!(connection.ack_timer_started_at().is_some());

        let assembled = read_ack(&connection, &mut client_read_half).await.unwrap();
        writer.await.unwrap();

        assert_eq!(assembled.len(), 2500);
        assert_eq!(connection.state().get(), ConnectionState::ReceivedAck);
        assert!(connection.ack_timer_started_at().is_none(), "read_ack must clear the ack timer once the reply lands");
    }
}
