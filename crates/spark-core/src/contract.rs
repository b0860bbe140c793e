use crate::time::MonotonicTimePoint;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// 取消原语，统一表达跨模块的可中断性契约。
///
/// # 设计背景（Why）
/// - 握手等待、ack 超时监控、慢接收者断连都需要一种能从外部主动打断、且可在多个
///   派生持有者之间共享的信号；原子位 + `Arc` 是最小可行解。
///
/// # 逻辑解析（How）
/// - `cancel` 在首次成功置位时返回 `true`，重复调用返回 `false`，帮助调用方避免
///   重复执行收尾逻辑（例如重复通知成员服务 `suspectMember`）。
/// - `child` 返回共享同一原子位的派生实例，便于把取消信号从 `CallContext` 传播到
///   读者/写者/定时任务等子任务。
#[derive(Clone, Debug)]
pub struct Cancellation {
    inner: Arc<AtomicBool>,
}

impl Cancellation {
    /// 创建处于“未取消”状态的取消令牌。
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 查询当前是否已被标记取消。
    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::Acquire)
    }

    /// 将当前令牌标记为取消；返回 `true` 表示本次调用首次触发取消。
    pub fn cancel(&self) -> bool {
        self.inner
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// 派生共享同一原子位的子令牌。
    pub fn child(&self) -> Self {
        self.clone()
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

/// 截止原语：以单调时钟的绝对时间点表达操作的最迟完成时间。
///
/// # 契约说明（What）
/// - `Deadline::none()` 表示调用方未施加硬超时限制（例如长驻的共享读者循环）；
/// - `is_expired` 以调用方传入的当前时间点判断，避免依赖壁钟跳变。
///
/// # 风险提示（Trade-offs）
/// - 截止时间本身不会自动驱动取消；握手、ack 超时监控等场景需要在检测到超时后
///   主动调用 [`Cancellation::cancel`] 或直接触发关闭。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline {
    instant: Option<MonotonicTimePoint>,
}

impl Deadline {
    /// 未设置截止时间。
    pub const fn none() -> Self {
        Self { instant: None }
    }

    /// 基于绝对时间点构造截止时间。
    pub fn at(instant: MonotonicTimePoint) -> Self {
        Self {
            instant: Some(instant),
        }
    }

    /// 基于当前时间点加持续时间生成截止时间。
    pub fn with_timeout(now: MonotonicTimePoint, timeout: Duration) -> Self {
        Self::at(now.saturating_add(timeout))
    }

    /// 返回内部时间点。
    pub fn instant(&self) -> Option<MonotonicTimePoint> {
        self.instant
    }

    /// 判断截止时间是否已经过去。
    pub fn is_expired(&self, now: MonotonicTimePoint) -> bool {
        match self.instant {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }

    /// 返回距离截止还剩多久；未设置截止时返回 `None`。
    pub fn remaining(&self, now: MonotonicTimePoint) -> Option<Duration> {
        self.instant.map(|deadline| {
            if deadline > now {
                deadline.saturating_duration_since(now)
            } else {
                Duration::ZERO
            }
        })
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Deadline::none()
    }
}

/// 单次调用的取消/截止二元组视图，借用自某个 [`CallContext`]。
///
/// # 设计背景（Why）
/// - 热路径（`poll_ready`、读循环的每次迭代）只需要读取取消与截止信息即可决策，
///   没有必要克隆整个 [`CallContext`]；`CallView` 是它的零拷贝只读投影。
#[derive(Clone, Copy)]
pub struct CallView<'a> {
    cancellation: &'a Cancellation,
    deadline: Deadline,
}

impl<'a> CallView<'a> {
    /// 构造调用上下文视图。
    pub fn new(cancellation: &'a Cancellation, deadline: Deadline) -> Self {
        Self {
            cancellation,
            deadline,
        }
    }

    /// 获取取消原语引用。
    pub fn cancellation(&self) -> &'a Cancellation {
        self.cancellation
    }

    /// 读取截止时间。
    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    /// 便捷方法：截止已过或已被取消。
    pub fn should_abort(&self, now: MonotonicTimePoint) -> bool {
        self.cancellation.is_cancelled() || self.deadline.is_expired(now)
    }
}

impl fmt::Display for CallView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CallView{{cancelled={}, has_deadline={}}}",
            self.cancellation.is_cancelled(),
            self.deadline.instant().is_some()
        )
    }
}

/// 拥有所有权、`'static`、可廉价克隆的调用上下文，用于跨 `tokio::spawn` 边界
/// 传递一条连接的取消/截止状态。
///
/// # 设计背景（Why）
/// - 读者循环、异步推送者、ack 超时监控、空闲回收器都在各自的任务中运行，
///   不能借用调用栈上的 [`Cancellation`]；`CallContext` 以 `Clone`（内部共享
///   `Arc`）的方式让这些任务各自持有一份句柄，又共享同一取消位。
///
/// # 逻辑解析（How）
/// - `child_with_timeout`/`child` 派生出共享同一 [`Cancellation`] 但拥有独立
///   截止时间的子上下文，供握手、单次 ack 等有自己超时预算的子操作使用；
///   取消子上下文不会影响父级（`Cancellation::child` 按 `Clone` 语义共享同一
///   原子位，因此取消会向兄弟上下文传播，但截止时间互不影响）。
#[derive(Clone)]
pub struct CallContext {
    cancellation: Cancellation,
    deadline: Deadline,
}

impl CallContext {
    /// 构造一个新的根上下文，拥有独立的取消位。
    pub fn new(deadline: Deadline) -> Self {
        Self {
            cancellation: Cancellation::new(),
            deadline,
        }
    }

    /// 从已有的取消原语与截止时间构造上下文。
    pub fn from_parts(cancellation: Cancellation, deadline: Deadline) -> Self {
        Self {
            cancellation,
            deadline,
        }
    }

    /// 取消原语的克隆句柄。
    pub fn cancellation(&self) -> Cancellation {
        self.cancellation.clone()
    }

    /// 当前截止时间。
    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    /// 派生一个共享同一取消位、但拥有独立截止时间的子上下文。
    pub fn child_with_deadline(&self, deadline: Deadline) -> Self {
        Self {
            cancellation: self.cancellation.child(),
            deadline,
        }
    }

    /// 便捷方法：截止已过或已被取消。
    pub fn should_abort(&self, now: MonotonicTimePoint) -> bool {
        self.cancellation.is_cancelled() || self.deadline.is_expired(now)
    }

    /// 借出零拷贝视图，用于不需要跨任务边界的热路径判断。
    pub fn view(&self) -> CallView<'_> {
        CallView::new(&self.cancellation, self.deadline)
    }
}

impl fmt::Display for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CallContext{{cancelled={}, has_deadline={}}}",
            self.cancellation.is_cancelled(),
            self.deadline.instant().is_some()
        )
    }
}
