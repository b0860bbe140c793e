//! Ack 超时与严重告警监控：周期性巡检处于 `Sending`/`ReadingAck` 的连接。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 一次直接 ack 发送如果迟迟收不到回复，既可能是对端繁忙，也可能是对端
//!   已经死亡；两者需要不同的处置——前者先警告并怀疑，后者在严重阈值之后
//!   升级为致命告警，并重置"连接组"（同一次多播式发送涉及的兄弟连接）的
//!   计时起点，避免它们在同一时刻集体告警造成日志风暴。
//!
//! ## 逻辑解析（How）
//! - `AckTimerState` 记录发送起始时间与所属连接组；`poll_once` 在每次巡检
//!   时计算已等待时长，跨过 `ack_wait_threshold` 触发一次性警告+怀疑，跨过
//!   `ack_wait_threshold + ack_severe_alert_threshold` 触发一次性致命告警并
//!   请求重置组内其它连接的起始时间。

use crate::collaborators::Collaborators;
use crate::config::EngineConfig;
use crate::connection::Connection;
use dashmap::DashMap;
use spark_core::prelude::MonotonicTimePoint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

/// 一次等待 ack 的会话状态，随连接一起创建/销毁。
pub struct AckTimerState {
    started_at: MonotonicTimePoint,
    group_id: u64,
    warned: AtomicBool,
    severely_alerted: AtomicBool,
}

impl AckTimerState {
    pub fn start(group_id: u64) -> Self {
        Self {
            started_at: MonotonicTimePoint::now(),
            group_id,
            warned: AtomicBool::new(false),
            severely_alerted: AtomicBool::new(false),
        }
    }

    pub fn group_id(&self) -> u64 {
        self.group_id
    }

    #[cfg(test)]
    pub fn started_at(&self) -> MonotonicTimePoint {
        self.started_at
    }

    /// 把起始时间向后推移 `by`，供同组其它连接在严重告警时被动调整。
    pub fn advance_start(&mut self, by: Duration) {
        self.started_at = self.started_at.saturating_add(by);
    }
}

/// 登记"同一次多播式发送"涉及的兄弟连接，供严重告警时把彼此的等待起点
/// 整体推后，避免它们在同一时刻集体升级告警造成日志风暴。
///
/// 持有 `Weak` 而非 `Arc`：登记表与连接表生命周期独立，连接正常关闭后
/// 不应被这张表继续钉住。
#[derive(Default)]
pub struct AckGroupRegistry {
    groups: DashMap<u64, Vec<Weak<Connection>>>,
}

impl AckGroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 把一条连接登记进某个发送组。
    pub fn join(&self, group_id: u64, connection: &Arc<Connection>) {
        self.groups.entry(group_id).or_default().push(Arc::downgrade(connection));
    }

    /// 把组内除 `except_connection_id` 之外仍存活的连接的 ack 等待起点推后 `by`。
    pub fn advance_siblings(&self, group_id: u64, except_connection_id: u64, by: Duration) {
        let Some(mut members) = self.groups.get_mut(&group_id) else {
            return;
        };
        members.retain(|weak| weak.strong_count() > 0);
        for weak in members.iter() {
            if let Some(connection) = weak.upgrade() {
                if connection.id() != except_connection_id {
                    connection.advance_ack_timer_start(by);
                }
            }
        }
    }
}

/// 单次巡检的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckTimerOutcome {
    /// 尚未越过任何阈值。
    Healthy,
    /// 越过 `ackWait`，已怀疑对端。
    WarnedAndSuspected,
    /// 越过 `ackWait + ackSevereAlert`，已发出严重告警。
    SeverelyAlerted,
}

/// 巡检一次；`remote_identity` 用于向成员服务报告怀疑对象，`connection_id`
/// 用于严重告警时从组内其它连接中把自己排除。
pub fn poll_once(
    state: &AckTimerState,
    config: &EngineConfig,
    collaborators: &Collaborators,
    remote_identity: &[u8],
    groups: &AckGroupRegistry,
    connection_id: u64,
) -> AckTimerOutcome {
    let now = MonotonicTimePoint::now();
    let elapsed = now.saturating_duration_since(state.started_at);

    let severe_bound = config.ack_wait_threshold + config.ack_severe_alert_threshold;
    if elapsed >= severe_bound {
        if !state.severely_alerted.swap(true, Ordering::AcqRel) {
            collaborators.stats.record_ack_severe_alert();
            tracing::error!(
                target: "p2p.ack_timer",
                group_id = state.group_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "ack severe alert: peer has not replied past ackWait + ackSevereAlert"
            );
            // Sibling connections in the same multicast-style send shouldn't all alert at
            // the same instant; push their start times back by the severe-alert increment.
            groups.advance_siblings(state.group_id, connection_id, config.ack_severe_alert_threshold);
        }
        return AckTimerOutcome::SeverelyAlerted;
    }

    if elapsed >= config.ack_wait_threshold {
        if !state.warned.swap(true, Ordering::AcqRel) {
            collaborators.stats.record_ack_wait_exceeded();
            tracing::warn!(
                target: "p2p.ack_timer",
                group_id = state.group_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "ack wait threshold exceeded, suspecting peer"
            );
            if config.ack_severe_alert_threshold > Duration::ZERO {
                collaborators.membership.suspect_member(remote_identity, "ack wait threshold exceeded");
            }
        }
        return AckTimerOutcome::WarnedAndSuspected;
    }

    AckTimerOutcome::Healthy
}

/// 按 `ackWaitThreshold` 周期巡检一条连接，直至其 ack 计时器被清除（ack 已
/// 收到）或连接进入关闭流程。对应 §4.7 的 `SystemTimer` 周期任务。
pub fn spawn_ack_monitor(
    connection: Arc<Connection>,
    config: EngineConfig,
    collaborators: Collaborators,
    groups: Arc<AckGroupRegistry>,
    remote_identity: Vec<u8>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(config.ack_wait_threshold).await;
            if connection.is_closing() {
                return;
            }
            match connection.poll_ack_timer(&config, &collaborators, &groups, &remote_identity) {
                Some(_) => continue,
                None => return,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CountingStats, MockConnectionTable, MockDispatcher, MockMembership};
    use std::sync::Arc;

    fn collaborators() -> Collaborators {
        Collaborators {
            membership: Arc::new(MockMembership::new(b"local".to_vec())),
            table: Arc::new(MockConnectionTable::default()),
            dispatcher: Arc::new(MockDispatcher::default()),
            stats: Arc::new(CountingStats::default()),
            ack_groups: Arc::new(crate::ack_timer::AckGroupRegistry::new()),
        }
    }

    #[test]
    fn healthy_before_any_threshold() {
        let state = AckTimerState::start(1);
        let config = EngineConfig::new();
        let collaborators = collaborators();
        let groups = AckGroupRegistry::new();
        assert_eq!(poll_once(&state, &config, &collaborators, b"peer", &groups, 1), AckTimerOutcome::Healthy);
    }

    #[test]
    fn severe_alert_fires_once_past_combined_threshold() {
        let state = AckTimerState::start(1);
        let mut config = EngineConfig::new();
        config.ack_wait_threshold = Duration::from_millis(5);
        config.ack_severe_alert_threshold = Duration::from_millis(5);
        let collaborators = collaborators();
        let groups = AckGroupRegistry::new();

        std::thread::sleep(Duration::from_millis(20));
        let outcome = poll_once(&state, &config, &collaborators, b"peer", &groups, 1);
        assert_eq!(outcome, AckTimerOutcome::SeverelyAlerted);
    }

    #[test]
    fn severe_alert_advances_sibling_start_time_by_severe_alert_increment() {
        let collaborators = collaborators();
        let config = EngineConfig::new();
        let groups = Arc::new(AckGroupRegistry::new());

        let sibling = Connection::new_for_test(2, collaborators.clone(), config.clone());
        sibling.start_ack_timer(7, &groups);

        let state = AckTimerState::start(7);
        let mut config = config;
        config.ack_wait_threshold = Duration::from_millis(1);
        config.ack_severe_alert_threshold = Duration::from_millis(1);
        std::thread::sleep(Duration::from_millis(5));

        // Connection id 1 (not registered in `groups`) triggers the severe alert; the
        // sibling connection id 2, registered under the same group, must have its ack
        // timer start time pushed forward so it doesn't alert on the very same tick.
        let before = sibling.ack_timer_started_at().unwrap();
        poll_once(&state, &config, &collaborators, b"peer", &groups, 1);
        let after = sibling.ack_timer_started_at().unwrap();
        assert!(after > before);
    }
}
