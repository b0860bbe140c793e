use std::time::{Duration, Instant};

/// 单调时钟上的绝对时间点，供 [`crate::contract::Deadline`]、握手等待、ack 超时监控
/// 等一切需要“绝对到期时间”而非相对 `Duration` 的场景使用。
///
/// # 设计背景（Why）
/// - 直接在各处传递 `Duration` 会让“剩余时间”随调用栈深度重新计算而逐渐漂移；统一
///   以单调时钟的绝对时间点表达，截止判断只需一次比较。
///
/// # 风险提示（Trade-offs）
/// - 仅包装 `std::time::Instant`；若调用方混用来自不同进程/时钟源的时间点会产生轻微
///   漂移，这与标准库 `Instant` 本身的限制一致。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonotonicTimePoint(Instant);

impl MonotonicTimePoint {
    /// 返回当前单调时间点。
    pub fn now() -> Self {
        Self(Instant::now())
    }

    /// 基于当前点加上一段时长，饱和运算避免溢出 panic。
    pub fn saturating_add(self, duration: Duration) -> Self {
        Self(self.0.checked_add(duration).unwrap_or(self.0))
    }

    /// 返回自某个更早时间点起经过的时长；若 `self` 早于 `earlier` 返回 `Duration::ZERO`。
    pub fn saturating_duration_since(self, earlier: MonotonicTimePoint) -> Duration {
        self.0.saturating_duration_since(earlier.0)
    }

    /// 暴露底层 `Instant`，供需要与其他计时 API 互操作的调用方使用。
    pub fn as_instant(self) -> Instant {
        self.0
    }
}

impl From<Instant> for MonotonicTimePoint {
    fn from(instant: Instant) -> Self {
        Self(instant)
    }
}
