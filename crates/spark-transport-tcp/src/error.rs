//! 引擎内 I/O 故障到 [`CoreError`] 的统一映射。
//!
//! # 设计背景（Why）
//! - 读者、写者、握手、连接表在各自层次遇到的都是 `std::io::Error`，但上层
//!   （连接生命周期管理、统计汇聚）需要的是稳定错误码与可重试分类，而不是
//!   解析 `io::ErrorKind` 的自由文本。本模块把这层翻译集中到一处。

use spark_core::prelude::{CoreError, ErrorCategory, RetryAdvice};
use std::io;
use std::time::Duration;

/// 标识一次引擎操作的稳定错误码前缀，用于拼出 `namespace.reason` 形式的
/// `CoreError::code`。
#[derive(Debug, Clone, Copy)]
pub struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub const BIND: OperationKind = OperationKind { code: "p2p.listener.bind", message: "failed to bind listener socket" };
pub const ACCEPT: OperationKind = OperationKind { code: "p2p.listener.accept", message: "failed to accept inbound connection" };
pub const CONNECT: OperationKind = OperationKind { code: "p2p.connection.connect", message: "failed to connect to peer" };
pub const READ: OperationKind = OperationKind { code: "p2p.reader.read", message: "failed to read from socket" };
pub const WRITE: OperationKind = OperationKind { code: "p2p.writer.write", message: "failed to write to socket" };
pub const HANDSHAKE: OperationKind = OperationKind { code: "p2p.handshake", message: "handshake failed" };
pub const FRAMING: OperationKind = OperationKind { code: "p2p.framing", message: "frame violates protocol" };
pub const CONFIGURE: OperationKind = OperationKind { code: "p2p.socket.configure", message: "failed to configure socket options" };

/// 判断一个 `io::ErrorKind` 是否属于可忽略的“对端主动断开”类信号：这些错误只
/// 应以 debug 级别记录，不应当升级为告警。
pub fn is_ignorable_peer_reset(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe
    )
}

/// 将底层 I/O 错误归类为可重试/致命/协议错误，并附带建议退避时长。
pub fn categorize_io_error(err: &io::Error) -> ErrorCategory {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => {
            ErrorCategory::Retryable(RetryAdvice::after(Duration::from_millis(1)))
        }
        io::ErrorKind::TimedOut => ErrorCategory::Timeout,
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::NotConnected => ErrorCategory::NonRetryable,
        io::ErrorKind::PermissionDenied | io::ErrorKind::Unsupported => ErrorCategory::NonRetryable,
        _ => ErrorCategory::NonRetryable,
    }
}

/// 把一个 `io::Error` 包装为 [`CoreError`]，附带操作标识与分类。
pub fn map_io_error(op: OperationKind, err: io::Error) -> CoreError {
    let category = categorize_io_error(&err);
    CoreError::new(op.code, op.message)
        .with_cause(err)
        .with_category(category)
}

/// 构造一个“因取消信号终止”的 [`CoreError`]。
pub fn cancelled_error(op: OperationKind) -> CoreError {
    CoreError::new(op.code, "operation cancelled").with_category(ErrorCategory::Cancelled)
}

/// 构造一个“超过截止时间”的 [`CoreError`]。
pub fn timeout_error(op: OperationKind) -> CoreError {
    CoreError::new(op.code, "operation exceeded its deadline").with_category(ErrorCategory::Timeout)
}

/// 构造一个协议违规错误（版本不匹配、非法类型、超长载荷等）。
pub fn protocol_error(message: impl Into<std::borrow::Cow<'static, str>>) -> CoreError {
    CoreError::new(FRAMING.code, message).with_category(ErrorCategory::ProtocolViolation)
}
