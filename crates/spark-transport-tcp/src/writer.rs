//! 同步写路径：持有 `outLock` 期间完成"过滤器封装 + 部分写循环"，并通过一个
//! 可重入的信号量限制并发写者数量。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 任意数量的应用线程都可能同时尝试向同一条连接写入；`outLock` 保证单条
//!   消息的序列化+写出是一个原子区间，`SenderSemaphore` 则把并发写者数量
//!   限制在 `maxConnectionSenders`（默认 8）以内，避免无界扇入拖垮一个 socket。
//! - 读者线程必须绕过该信号量：否则在写者把信号量耗尽时，ack 读取会被自己
//!   的写路径饿死，形成死锁。
//!
//! ## 逻辑解析（How）
//! - 原始实现用线程局部变量区分"当前线程是读者线程"与"当前调用栈已经持有
//!   许可（链式发送）"。这里不依赖隐式线程状态，而是把这两个布尔显式放进
//!   调用方携带的 [`SendContext`]，由上一层调用在发起链式发送时原样传递，
//!   这正是任务局部上下文应当显式化传递的做法。

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// 随调用栈显式传递的发送上下文，替代原始实现里的线程局部变量。
#[derive(Debug, Clone, Copy, Default)]
pub struct SendContext {
    /// 当前调用是否运行在该连接的读者任务中（ack 读取路径）。
    pub is_reader_task: bool,
    /// 当前调用栈是否已经持有一个发送许可（链式发送场景）。
    pub already_holds_permit: bool,
}

impl SendContext {
    pub fn reader() -> Self {
        Self { is_reader_task: true, already_holds_permit: false }
    }

    /// 派生一个"已持有许可"的子上下文，供链式发送调用使用。
    pub fn nested(self) -> Self {
        Self { already_holds_permit: true, ..self }
    }
}

/// 写路径的并发准入控制。
pub struct SenderSemaphore {
    inner: Arc<Semaphore>,
}

impl SenderSemaphore {
    pub fn new(max_permits: usize) -> Self {
        Self {
            inner: Arc::new(Semaphore::new(max_permits)),
        }
    }

    /// 申请发送许可。读者任务与已持有许可的链式调用都直接绕过信号量。
    pub async fn acquire(&self, ctx: SendContext) -> SendPermit {
        if ctx.is_reader_task {
            return SendPermit::ReaderBypass;
        }
        if ctx.already_holds_permit {
            return SendPermit::Reentrant;
        }
        let permit = self
            .inner
            .clone()
            .acquire_owned()
            .await
            .expect("sender semaphore is never closed while the connection is alive");
        SendPermit::Held(permit)
    }
}

/// RAII 发送许可；`Drop` 自动释放真正持有的信号量许可（`Held` 变体），或者
/// 什么都不做（`Reentrant`/`ReaderBypass`）。
pub enum SendPermit {
    Held(OwnedSemaphorePermit),
    Reentrant,
    ReaderBypass,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reader_bypass_never_touches_the_semaphore() {
        let sem = SenderSemaphore::new(1);
        let _held = sem.acquire(SendContext::default()).await;
        let _reader_permit = sem.acquire(SendContext::reader()).await;
    }

    #[tokio::test]
    async fn nested_send_context_does_not_reacquire() {
        let sem = SenderSemaphore::new(1);
        let outer = sem.acquire(SendContext::default()).await;
        assert!(matches!(outer, SendPermit::Held(_)));
        let inner = sem.acquire(SendContext::default().nested()).await;
        assert!(matches!(inner, SendPermit::Reentrant));
    }

    #[tokio::test]
    async fn non_reader_acquire_respects_capacity() {
        let sem = SenderSemaphore::new(1);
        let first = sem.acquire(SendContext::default()).await;
        assert!(matches!(first, SendPermit::Held(_)));
        drop(first);
        let second = sem.acquire(SendContext::default()).await;
        assert!(matches!(second, SendPermit::Held(_)));
    }
}
