//! 7 字节消息头的编解码与校验。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 每条连接上的所有帧——握手、正常消息、分块消息、直接 ack 回复——共享同一
//!   个头部格式；把编解码与校验集中到一处，读者状态机与写路径都不需要各自
//!   重新实现位运算。
//!
//! ## 逻辑解析（How）
//! - 前 4 字节是大端 32 位字段 `(HANDSHAKE_VERSION << 24) | (payloadLen & 0x00FFFFFF)`，
//!   载荷长度上限 16 MiB − 1；
//! - 第 5 字节是消息类型，高位 `0x20` 是直接 ack 标志，校验类型前必须先清除;
//! - 第 6-7 字节是大端 16 位消息 id，用于关联分块，`NO_MSG_ID` 为保留值。
//!
//! ## 契约（What）
//! - `encode_header`/`decode_header` 互为逆操作；
//! - `validate_type` 只接受 `{Normal, Chunk, FinalChunk}`；
//! - 版本不匹配、非法类型、超长载荷一律返回 [`spark_core::error::CoreError`]
//!   协议错误，调用方应当发起致命关闭。

use crate::error::protocol_error;
use bytes::{Buf, BufMut};
use spark_core::prelude::Result;

/// 当前协议实现的握手/帧版本号。
pub const HANDSHAKE_VERSION: u8 = 7;

/// 头部长度字段的最大可表达载荷（16 MiB − 1）。
pub const MAX_PAYLOAD_LEN: u32 = 0x00FF_FFFF;

/// 分块关联保留的"无消息 id"哨兵值。
pub const NO_MSG_ID: u16 = 0xFFFF;

/// 直接 ack 标志位，携带在类型字节的高位。
pub const DIRECT_ACK_FLAG: u8 = 0x20;

const TYPE_NORMAL: u8 = 0x4C;
const TYPE_CHUNK: u8 = 0x4D;
const TYPE_FINAL_CHUNK: u8 = 0x4E;

/// 帧承载的消息类型，已剥离直接 ack 标志位。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Normal,
    Chunk,
    FinalChunk,
}

impl MessageType {
    /// 将裸类型字节（已清除直接 ack 标志）校验并转换为 [`MessageType`]。
    pub fn validate(raw: u8) -> Result<Self, spark_core::error::CoreError> {
        match raw {
            TYPE_NORMAL => Ok(MessageType::Normal),
            TYPE_CHUNK => Ok(MessageType::Chunk),
            TYPE_FINAL_CHUNK => Ok(MessageType::FinalChunk),
            other => Err(protocol_error(format!("illegal message type byte {other:#04x}"))),
        }
    }

    fn raw(self) -> u8 {
        match self {
            MessageType::Normal => TYPE_NORMAL,
            MessageType::Chunk => TYPE_CHUNK,
            MessageType::FinalChunk => TYPE_FINAL_CHUNK,
        }
    }
}

/// 解码后的头部字段集合。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub message_type: MessageType,
    pub message_id: u16,
    pub payload_len: u32,
    pub direct_ack: bool,
}

/// 头部固定长度（字节）。
pub const HEADER_LEN: usize = 7;

/// 编码一个头部到 `out`。`payload_len` 必须不超过 [`MAX_PAYLOAD_LEN`]。
pub fn encode_header(
    message_type: MessageType,
    direct_ack: bool,
    message_id: u16,
    payload_len: u32,
    out: &mut impl BufMut,
) -> Result<(), spark_core::error::CoreError> {
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(protocol_error(format!(
            "payload length {payload_len} exceeds maximum of {MAX_PAYLOAD_LEN}"
        )));
    }
    let length_field = ((HANDSHAKE_VERSION as u32) << 24) | (payload_len & MAX_PAYLOAD_LEN);
    out.put_u32(length_field);
    let mut type_byte = message_type.raw();
    if direct_ack {
        type_byte |= DIRECT_ACK_FLAG;
    }
    out.put_u8(type_byte);
    out.put_u16(message_id);
    Ok(())
}

/// 从 `buf` 解码一个头部；要求至少有 [`HEADER_LEN`] 字节可用。
pub fn decode_header(buf: &mut impl Buf) -> Result<FrameHeader, spark_core::error::CoreError> {
    if buf.remaining() < HEADER_LEN {
        return Err(protocol_error("insufficient bytes to decode frame header"));
    }
    let length_field = buf.get_u32();
    let version = (length_field >> 24) as u8;
    if version != HANDSHAKE_VERSION {
        return Err(protocol_error(format!(
            "handshake version mismatch: peer sent {version}, expected {HANDSHAKE_VERSION}"
        )));
    }
    let payload_len = length_field & MAX_PAYLOAD_LEN;

    let raw_type = buf.get_u8();
    let direct_ack = raw_type & DIRECT_ACK_FLAG != 0;
    let cleared_type = raw_type & !DIRECT_ACK_FLAG;
    let message_type = MessageType::validate(cleared_type)?;

    let message_id = buf.get_u16();

    Ok(FrameHeader {
        message_type,
        message_id,
        payload_len,
        direct_ack,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn roundtrip(message_type: MessageType, direct_ack: bool, message_id: u16, payload_len: u32) {
        let mut buf = BytesMut::new();
        encode_header(message_type, direct_ack, message_id, payload_len, &mut buf).unwrap();
        let decoded = decode_header(&mut buf).unwrap();
        assert_eq!(decoded.message_type, message_type);
        assert_eq!(decoded.direct_ack, direct_ack);
        assert_eq!(decoded.message_id, message_id);
        assert_eq!(decoded.payload_len, payload_len);
    }

    #[test]
    fn header_roundtrips_for_all_types() {
        roundtrip(MessageType::Normal, false, NO_MSG_ID, 0);
        roundtrip(MessageType::Normal, true, 42, 12345);
        roundtrip(MessageType::Chunk, false, 7, MAX_PAYLOAD_LEN);
        roundtrip(MessageType::FinalChunk, true, u16::MAX - 1, 500);
    }

    #[test]
    fn validate_type_rejects_everything_but_three_bytes() {
        for raw in 0u8..=255 {
            let result = MessageType::validate(raw);
            match raw {
                0x4C | 0x4D | 0x4E => assert!(result.is_ok()),
                _ => assert!(result.is_err()),
            }
        }
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let mut buf = BytesMut::new();
        let bogus_length_field = (6u32 << 24) | 10;
        buf.put_u32(bogus_length_field);
        buf.put_u8(TYPE_NORMAL);
        buf.put_u16(NO_MSG_ID);
        let err = decode_header(&mut buf).unwrap_err();
        assert!(err.message().contains("version mismatch"));
    }

    #[test]
    fn oversize_payload_is_rejected_at_encode_time() {
        let mut buf = BytesMut::new();
        let err = encode_header(MessageType::Normal, false, NO_MSG_ID, MAX_PAYLOAD_LEN + 1, &mut buf)
            .unwrap_err();
        assert!(err.message().contains("exceeds maximum"));
    }

    #[test]
    fn direct_ack_flag_is_cleared_before_type_validation() {
        let mut buf = BytesMut::new();
        encode_header(MessageType::FinalChunk, true, 9, 3, &mut buf).unwrap();
        let decoded = decode_header(&mut buf).unwrap();
        assert_eq!(decoded.message_type, MessageType::FinalChunk);
        assert!(decoded.direct_ack);
    }
}
