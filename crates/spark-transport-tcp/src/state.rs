//! 连接状态机：六态标签变体，由一把互斥锁统一守护。
//!
//! 状态转换与读者中断是成对发生的（例如从 `Reading` 转出时可能需要先中断
//! 读者任务），所以这里用一把锁而不是无锁 CAS，保持转换的原子性。

use parking_lot::Mutex;

/// 连接在其生命周期中经过的六个状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Sending,
    PostSending,
    ReadingAck,
    ReceivedAck,
    Reading,
}

/// 由互斥锁守护的状态槽，外加一个独立的"最近被访问"标志供空闲回收器探测。
pub struct StateSlot {
    state: Mutex<ConnectionState>,
    accessed: std::sync::atomic::AtomicBool,
}

impl StateSlot {
    pub fn new(initial: ConnectionState) -> Self {
        Self {
            state: Mutex::new(initial),
            accessed: std::sync::atomic::AtomicBool::new(true),
        }
    }

    pub fn get(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn set(&self, new_state: ConnectionState) {
        *self.state.lock() = new_state;
        self.mark_accessed();
    }

    /// 仅当当前状态等于 `expected` 时才转换为 `new_state`；返回是否发生了转换。
    pub fn transition_if(&self, expected: ConnectionState, new_state: ConnectionState) -> bool {
        let mut guard = self.state.lock();
        if *guard == expected {
            *guard = new_state;
            drop(guard);
            self.mark_accessed();
            true
        } else {
            false
        }
    }

    pub fn mark_accessed(&self) {
        self.accessed.store(true, std::sync::atomic::Ordering::Relaxed);
    }

    /// 空闲回收器探测：读取并清除 `accessed` 标志。
    pub fn take_accessed(&self) -> bool {
        self.accessed.swap(false, std::sync::atomic::Ordering::Relaxed)
    }
}
