//! 协作方的测试替身：noop 统计/分发器，记录调用的成员服务/连接表 mock。

use crate::collaborators::{
    ConnectionTableContract, InboundMessage, MembershipContract, StatisticsSink, UpstreamDispatcher,
};
use crate::connection::Connection;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// 记录所有怀疑/移除请求的成员服务 mock，便于断言失败检测路径被正确触发。
#[derive(Default)]
pub struct MockMembership {
    local_identity: Vec<u8>,
    shunned: Mutex<HashSet<Vec<u8>>>,
    pub suspected: Mutex<Vec<(Vec<u8>, String)>>,
    pub removal_requests: Mutex<Vec<(Vec<u8>, String)>>,
    pub surprise_members: Mutex<Vec<Vec<u8>>>,
    shutting_down: std::sync::atomic::AtomicBool,
}

impl MockMembership {
    pub fn new(local_identity: impl Into<Vec<u8>>) -> Self {
        Self {
            local_identity: local_identity.into(),
            ..Default::default()
        }
    }

    pub fn shun(&self, identity: impl Into<Vec<u8>>) {
        self.shunned.lock().insert(identity.into());
    }

    pub fn set_shutdown_in_progress(&self, value: bool) {
        self.shutting_down.store(value, Ordering::Relaxed);
    }
}

impl MembershipContract for MockMembership {
    fn local_identity(&self) -> Vec<u8> {
        self.local_identity.clone()
    }

    fn member_exists(&self, identity: &[u8]) -> bool {
        !self.shunned.lock().contains(identity)
    }

    fn is_shunned(&self, identity: &[u8]) -> bool {
        self.shunned.lock().contains(identity)
    }

    fn shutdown_in_progress(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    fn add_surprise_member(&self, identity: &[u8]) {
        self.surprise_members.lock().push(identity.to_vec());
    }

    fn suspect_member(&self, identity: &[u8], reason: &str) {
        self.suspected.lock().push((identity.to_vec(), reason.to_string()));
    }

    fn request_member_removal(&self, identity: &[u8], reason: &str) {
        self.removal_requests.lock().push((identity.to_vec(), reason.to_string()));
    }
}

/// 记录注册/移除调用的连接表 mock；不实现真正的共享连接查找去重。
#[derive(Default)]
pub struct MockConnectionTable {
    pub registered: Mutex<Vec<u64>>,
    pub removed: Mutex<Vec<(u64, bool)>>,
}

impl ConnectionTableContract for MockConnectionTable {
    fn register(&self, connection: Arc<Connection>) {
        self.registered.lock().push(connection.id());
    }

    fn remove(&self, connection_id: u64, force: bool) {
        self.removed.lock().push((connection_id, force));
    }

    fn find_shared(&self, _remote: &[u8], _preserve_order: bool) -> Option<Arc<Connection>> {
        None
    }
}

/// 记录所有投递消息的分发器 mock；默认承担 ack 责任。
#[derive(Default)]
pub struct MockDispatcher {
    pub received: Mutex<Vec<InboundMessage>>,
    pub refuse_ack: std::sync::atomic::AtomicBool,
}

impl MockDispatcher {
    pub fn refusing_ack() -> Self {
        let this = Self::default();
        this.refuse_ack.store(true, Ordering::Relaxed);
        this
    }
}

impl UpstreamDispatcher for MockDispatcher {
    fn message_received(&self, _connection: &Arc<Connection>, message: InboundMessage, _bytes_read: usize) -> bool {
        let accepts_ack = !self.refuse_ack.load(Ordering::Relaxed);
        self.received.lock().push(message);
        accepts_ack
    }
}

/// 基于原子计数器的统计汇聚实现，便于测试断言计数变化。
#[derive(Default)]
pub struct CountingStats {
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub async_conflated_msgs: AtomicU64,
    pub async_queue_size: AtomicI64,
    pub ack_wait_exceeded: AtomicU64,
    pub ack_severe_alert: AtomicU64,
}

impl StatisticsSink for CountingStats {
    fn inc_messages_sent(&self, count: u64) {
        self.messages_sent.fetch_add(count, Ordering::Relaxed);
    }

    fn inc_messages_received(&self, count: u64) {
        self.messages_received.fetch_add(count, Ordering::Relaxed);
    }

    fn inc_async_conflated_msgs(&self, count: u64) {
        self.async_conflated_msgs.fetch_add(count, Ordering::Relaxed);
    }

    fn inc_async_queue_size(&self, delta: i64) {
        self.async_queue_size.fetch_add(delta, Ordering::Relaxed);
    }

    fn record_ack_wait_exceeded(&self) {
        self.ack_wait_exceeded.fetch_add(1, Ordering::Relaxed);
    }

    fn record_ack_severe_alert(&self) {
        self.ack_severe_alert.fetch_add(1, Ordering::Relaxed);
    }
}
