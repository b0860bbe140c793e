//! 引擎级不可变配置，替代原始实现中散落的静态可变字段。
//!
//! # 设计背景（Why）
//! - 连接超时、异步队列阈值、ack 告警阈值等在原始实现里以进程级静态可变字段
//!   存在，既难以在测试中按用例覆盖，又让多个连接表实例（例如单进程内跑多个
//!   网格成员的集成测试）互相污染。这里把它们收敛为一份在构造时传入、此后
//!   只读的配置记录，测试专用的强制开关单独放进 [`TestHooks`]。

use std::time::Duration;

/// 一条连接表/引擎实例生命周期内保持不变的配置。
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// `SO_SNDBUF`/`SO_RCVBUF` 与输入缓冲默认分配大小。
    pub tcp_buffer_size: usize,
    /// 控制帧（握手、直接 ack）缓冲大小，默认 4096。
    pub small_buffer_size: usize,
    /// 握手等待的超时时长，默认 59 秒。
    pub handshake_timeout: Duration,
    /// 成员失败检测的基准超时；`p2p_connect_timeout` 默认是它的 6 倍。
    pub member_timeout: Duration,
    /// 发起方建连的总体超时上限，默认 `member_timeout` 的 6 倍。
    pub p2p_connect_timeout: Duration,
    /// 每条连接写路径的并发许可数，默认 8。
    pub max_connection_senders: usize,
    /// 非阻塞写在切换到队列模式前的最大自旋时长；0 表示禁用异步队列模式。
    pub async_distribution_timeout: Duration,
    /// 推送者允许的最大空闲（未排空）时长，超过视为慢接收者。
    pub async_queue_timeout: Duration,
    /// 异步出站队列的字节上限，超过触发慢接收者断连。
    pub async_max_queue_size: u64,
    /// ack 等待阈值；达到后记录警告并怀疑对端。
    pub ack_wait_threshold: Duration,
    /// 在 `ack_wait_threshold` 基础上的严重告警增量阈值。
    pub ack_severe_alert_threshold: Duration,
    /// 连接空闲回收窗口。
    pub idle_timeout: Duration,
    /// 是否启用 TLS I/O 过滤器。
    pub use_ssl: bool,
    /// 发送方连接重试退避时长，默认 2000 毫秒。
    pub reconnect_wait_time: Duration,
}

impl EngineConfig {
    /// 沿用原始实现的默认值构造配置。
    pub fn new() -> Self {
        let member_timeout = Duration::from_secs(5);
        Self {
            tcp_buffer_size: 32 * 1024,
            small_buffer_size: 4096,
            handshake_timeout: Duration::from_secs(59),
            member_timeout,
            p2p_connect_timeout: member_timeout * 6,
            max_connection_senders: 8,
            async_distribution_timeout: Duration::from_millis(20),
            async_queue_timeout: Duration::from_secs(60),
            async_max_queue_size: 1024 * 1024,
            ack_wait_threshold: Duration::from_secs(15),
            ack_severe_alert_threshold: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(120),
            use_ssl: false,
            reconnect_wait_time: Duration::from_millis(2000),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// 测试专用的行为强制开关，独立于 [`EngineConfig`] 以避免生产路径读取到
/// 测试才会设置的字段。
///
/// # 契约说明（What）
/// - `force_async_queue`：强制每条新连接的写路径立即进入队列模式，跳过
///   非阻塞自旋阶段，用于确定性地复现 conflation 与慢接收者场景；
/// - `force_sick_close`：强制关闭级联走同步内联路径而非后台异步关闭器，
///   便于测试断言关闭完成后的状态。
#[derive(Debug, Clone, Copy, Default)]
pub struct TestHooks {
    pub force_async_queue: bool,
    pub force_sick_close: bool,
}
