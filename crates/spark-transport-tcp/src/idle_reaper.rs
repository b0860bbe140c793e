//! 空闲连接回收：探测 `accessed` 标志，清零则重新调度，否则关闭以便重连。
//!
//! 共享的无序连接（成员失败检测通道）被豁免——它们的静默正是其职责所在，
//! 回收器绝不能因为它们长期空闲就把它们关闭。

use crate::connection::{CloseOptions, Connection};
use crate::state::StateSlot;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// 单次空闲探测的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleProbeOutcome {
    /// 最近被访问过，标志已清零，应当重新调度下一轮探测。
    Accessed,
    /// 自上次探测以来未被访问，应当触发"为重连而关闭"。
    ShouldReapForReconnect,
    /// 该连接被豁免（共享的无序失败检测通道），本轮直接跳过。
    Exempt,
}

/// 是否豁免空闲回收：共享且不保序的连接是成员失败检测通道，必须保持静默。
pub fn is_exempt(shared: bool, preserve_order: bool) -> bool {
    shared && !preserve_order
}

/// 对一条连接执行一次空闲探测。
pub fn probe(state: &StateSlot, shared: bool, preserve_order: bool) -> IdleProbeOutcome {
    if is_exempt(shared, preserve_order) {
        return IdleProbeOutcome::Exempt;
    }
    if state.take_accessed() {
        IdleProbeOutcome::Accessed
    } else {
        IdleProbeOutcome::ShouldReapForReconnect
    }
}

/// 每隔 `idle_timeout` 巡检一次；豁免连接巡检一次后直接退出任务（它们永远
/// 不会被回收，没有必要占用常驻定时器）。被回收的连接走"为重连而关闭"，不
/// 移除其在连接表中的登记，也不清理兄弟连接。
pub fn spawn_idle_task(connection: Arc<Connection>, idle_timeout: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        if is_exempt(connection.shared(), connection.preserve_order()) {
            return;
        }
        loop {
            tokio::time::sleep(idle_timeout).await;
            if connection.is_closing() {
                return;
            }
            match probe(connection.state(), connection.shared(), connection.preserve_order()) {
                IdleProbeOutcome::Accessed => continue,
                IdleProbeOutcome::ShouldReapForReconnect => {
                    tracing::debug!(connection_id = connection.id(), "idle timeout exceeded, closing for reconnect");
                    connection
                        .close(CloseOptions {
                            cleanup_endpoint: true,
                            remove_endpoint: true,
                            being_sick: false,
                            force_removal: false,
                        })
                        .await;
                    return;
                }
                IdleProbeOutcome::Exempt => return,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ConnectionState;

    #[test]
    fn exempt_shared_unordered_channel_is_never_reaped() {
        let state = StateSlot::new(ConnectionState::Idle);
        state.take_accessed(); // clear the initial accessed=true
        assert_eq!(probe(&state, true, false), IdleProbeOutcome::Exempt);
    }

    #[test]
    fn accessed_flag_reschedules_instead_of_reaping() {
        let state = StateSlot::new(ConnectionState::Idle);
        state.mark_accessed();
        assert_eq!(probe(&state, false, true), IdleProbeOutcome::Accessed);
        assert_eq!(probe(&state, false, true), IdleProbeOutcome::ShouldReapForReconnect);
    }
}
