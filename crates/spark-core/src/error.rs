use crate::status::RetryAdvice;
use std::borrow::Cow;
use std::fmt;

/// `spark-core` 统一的返回值别名，促使调用方显式声明错误类型而不是散落各处的
/// `Result<_, CoreError>` 样板。
pub type Result<T, E> = core::result::Result<T, E>;

/// 跨层共享的稳定错误域，是引擎内所有可观察错误的最终形态。
///
/// # 设计背景（Why）
/// - 读者、写者、握手、连接表在各自层次产生的故障需要合流为统一的错误码，便于统计与告警
///   做精确分类，而不必解析自由格式的字符串。
///
/// # 契约说明（What）
/// - `code`：稳定字符串，建议使用 `namespace.reason` 命名，例如 `p2p.handshake.version_mismatch`；
/// - `message`：人类可读描述，供日志排障使用；
/// - `cause`：可选的底层原因（通常是 `std::io::Error`）；
/// - `category`：供调用方决定重试/告警策略的分类标签，参见 [`ErrorCategory`]。
#[derive(Debug)]
pub struct CoreError {
    code: &'static str,
    message: Cow<'static, str>,
    cause: Option<ErrorCause>,
    category: Option<ErrorCategory>,
}

/// 错误原因的类型擦除包装，保持 `Send + Sync` 以便跨线程传播。
pub type ErrorCause = Box<dyn std::error::Error + Send + Sync + 'static>;

impl CoreError {
    /// 构造最小化的核心错误：仅包含稳定错误码与消息。
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
            category: None,
        }
    }

    /// 附加底层原因，保留完整的错误链供 `source()` 暴露。
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// 附加错误分类，供调用方决定重试/告警/断连策略。
    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 返回人类可读描述。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 返回错误分类（若已设置）。
    pub fn category(&self) -> Option<&ErrorCategory> {
        self.category.as_ref()
    }

    /// 判断该错误是否属于可重试类别（用于连接表决定是否重连，而不是自动重试本次调用）。
    pub fn is_retryable(&self) -> bool {
        matches!(self.category, Some(ErrorCategory::Retryable(_)))
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// 错误分类：帮助连接生命周期管理器与统计汇聚层在不解析消息文本的前提下决策。
///
/// 瞬时 I/O 故障走 `Retryable`，致命 I/O/协议错误走
/// `NonRetryable`/`ProtocolViolation`，取消与超时各自独立以便区分握手超时、
/// ack 超时等场景。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// 可重试的瞬时故障，附带建议的退避时长。
    Retryable(RetryAdvice),
    /// 不可重试的致命故障（连接应当关闭并重连）。
    NonRetryable,
    /// 违反帧/握手协议约束（版本不匹配、非法类型、超长载荷等）。
    ProtocolViolation,
    /// 因取消信号提前终止。
    Cancelled,
    /// 超过截止时间。
    Timeout,
}
