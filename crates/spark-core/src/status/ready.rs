use std::borrow::Cow;
use std::time::Duration;

/// 写路径/背压探测的核心状态枚举。
///
/// # 设计背景（Why）
/// - 同步写锁竞争、异步队列积压、慢接收者断连都需要向上暴露“繁忙但健康”与
///   “应当退避”两类语义，而不是简单的布尔值。
///
/// # 契约说明（What）
/// - `Ready`：可立即受理下一次写入；
/// - `Busy`：繁忙但连接仍健康，原因见 [`BusyReason`]；
/// - `RetryAfter`：建议调用方等待指定时长后重试（通常来自 I/O 层的
///   `WouldBlock`/`Interrupted` 退避策略）。
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReadyState {
    /// 完全就绪。
    Ready,
    /// 繁忙但健康。
    Busy(BusyReason),
    /// 建议等待指定时长后重试。
    RetryAfter(RetryAdvice),
}

/// 繁忙原因，帮助调用方/统计汇聚层区分锁竞争、队列积压等不同来源。
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BusyReason {
    /// 出站写锁（`outLock`）被其他线程持有。
    WriteLockContended,
    /// 异步出站队列已接近或超过 `asyncMaxQueueSize`。
    QueueNearCapacity { queued_bytes: u64, max_bytes: u64 },
    /// 发送方信号量（`maxConnectionSenders`）已无可用许可。
    SenderPermitsExhausted,
}

/// 退避建议：等待时长 + 可选的诊断描述。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAdvice {
    pub wait: Duration,
}

impl RetryAdvice {
    /// 构造一个建议等待 `wait` 后重试的退避信号。
    pub const fn after(wait: Duration) -> Self {
        Self { wait }
    }
}

impl BusyReason {
    /// 描述性文本，供日志字段使用（不携带动态数值的分支直接返回静态串）。
    pub fn as_label(&self) -> Cow<'static, str> {
        match self {
            BusyReason::WriteLockContended => Cow::Borrowed("write_lock_contended"),
            BusyReason::QueueNearCapacity { .. } => Cow::Borrowed("queue_near_capacity"),
            BusyReason::SenderPermitsExhausted => Cow::Borrowed("sender_permits_exhausted"),
        }
    }
}
