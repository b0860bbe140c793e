//! 引擎以外的协作方契约：成员服务、连接表、消息编解码、上游分发、统计汇聚。
//!
//! 这些接口对应的实现——成员视图维护、路由策略、磁盘持久化——不属于本引擎，
//! 引擎只依赖下述 Trait 对象与协作方交互，便于在测试中替换为 mock 实现。

use crate::ack_timer::AckGroupRegistry;
use crate::connection::Connection;
use std::sync::Arc;

/// 本地成员身份，握手阶段原样序列化后交换。
pub type MemberIdentity = Vec<u8>;

/// 成员服务：解答成员是否存在/被隔离，并接受怀疑/移除请求。
pub trait MembershipContract: Send + Sync + 'static {
    /// 本进程的成员身份，握手时发送给对端。
    fn local_identity(&self) -> MemberIdentity;

    /// 给定的成员身份当前是否仍在视图中。
    fn member_exists(&self, identity: &[u8]) -> bool;

    /// 给定的成员身份是否已被强制排除。
    fn is_shunned(&self, identity: &[u8]) -> bool;

    /// 本进程是否正在关闭。
    fn shutdown_in_progress(&self) -> bool;

    /// 接纳一个在握手中才首次出现、尚未出现在视图中的"惊喜成员"。
    fn add_surprise_member(&self, identity: &[u8]);

    /// 怀疑某个成员（ack 超时、握手超时等触发）。
    fn suspect_member(&self, identity: &[u8], reason: &str);

    /// 请求将某个成员从视图中移除（慢接收者断连触发）。
    fn request_member_removal(&self, identity: &[u8], reason: &str);
}

/// 连接表：拥有连接集合、路由新 socket、调度空闲/ack 定时任务。
///
/// 引擎自身不维护全局连接集合；`ConnectionTableContract` 的实现负责把
/// [`Connection`] 句柄按 `(remote, shared, preserve_order)` 索引并保证
/// "同一三元组至多一条活跃共享连接"的不变量。
pub trait ConnectionTableContract: Send + Sync + 'static {
    /// 登记一条已完成握手（发送方）或已接收首个字节（接收方）的连接。
    fn register(&self, connection: Arc<Connection>);

    /// 从表中移除一条连接；`force` 对应关闭级联里的 `forceRemoval`。
    fn remove(&self, connection_id: u64, force: bool);

    /// 按对端身份、共享/排序语义查找已存在的活跃连接。
    fn find_shared(&self, remote: &[u8], preserve_order: bool) -> Option<Arc<Connection>>;
}

/// 一条已组装完成的入站消息，payload 对引擎而言是不透明字节。
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message_id: u16,
    pub direct_ack: bool,
    pub payload: Vec<u8>,
}

/// 上游分发器：接收一条完整消息及其所属连接（用于直接 ack 回复路由）。
pub trait UpstreamDispatcher: Send + Sync + 'static {
    /// 投递一条完整消息；返回 `false` 表示分发器拒绝承担 ack 责任
    /// （例如发送方已被隔离），此时引擎会清除直接 ack 标志、不再尝试回复。
    fn message_received(&self, connection: &Arc<Connection>, message: InboundMessage, bytes_read: usize) -> bool;
}

/// 统计汇聚：计数器/计时器出口。
pub trait StatisticsSink: Send + Sync + 'static {
    fn inc_messages_sent(&self, count: u64);
    fn inc_messages_received(&self, count: u64);
    fn inc_async_conflated_msgs(&self, count: u64);
    fn inc_async_queue_size(&self, delta: i64);
    fn record_ack_wait_exceeded(&self);
    fn record_ack_severe_alert(&self);
}

/// 一组协作方句柄，随 [`Connection`] 构造时一并传入。
#[derive(Clone)]
pub struct Collaborators {
    pub membership: Arc<dyn MembershipContract>,
    pub table: Arc<dyn ConnectionTableContract>,
    pub dispatcher: Arc<dyn UpstreamDispatcher>,
    pub stats: Arc<dyn StatisticsSink>,
    /// 同一次多播式发送涉及的兄弟连接登记表，供 ack 严重告警重置彼此的等待起点。
    pub ack_groups: Arc<AckGroupRegistry>,
}
