//! 连接生命周期：构造、发送路径选择、关闭级联。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - `Connection` 是整个引擎的聚合根：它持有 socket/过滤器、出站队列、状态槽、
//!   发送信号量与关闭标志，并通过 [`Collaborators`] 与成员服务/连接表/分发器/
//!   统计汇聚交互。把这些状态集中到一个类型里，关闭级联才能保证"任意线程
//!   调用 close 都是幂等且不会永久阻塞"的契约。
//!
//! ## 逻辑解析（How）
//! - `closing` 用 `AtomicBool` 做 CAS，保证只有第一次调用真正执行关闭步骤；
//! - 写路径在 `send` 里按固定判定顺序选择同步写出或异步队列模式；
//! - 关闭级联按固定步骤顺序执行：先停止接受新发送、请求读者任务取消、
//!   异步关闭 socket、清空出站队列并唤醒推送者、取消定时任务、按选项从
//!   连接表移除。

use crate::ack_timer::{AckGroupRegistry, AckTimerOutcome, AckTimerState};
use crate::collaborators::Collaborators;
use crate::config::EngineConfig;
use crate::error::{cancelled_error, map_io_error, WRITE};
use crate::framing::{self, MessageType};
use crate::io_filter::{IoFilter, IoReadHalf, IoWriteHalf};
use crate::pusher::{self, PusherOutcome};
use crate::queue::{ConflationKey, OutgoingQueue};
use crate::reader::ReaderExit;
use crate::state::{ConnectionState, StateSlot};
use crate::writer::{SendContext, SenderSemaphore};
use bytes::BytesMut;
use parking_lot::Mutex as SyncMutex;
use spark_core::prelude::{CoreError, MonotonicTimePoint};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;

/// 连接在握手中扮演的角色。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Acceptor,
}

/// 对端身份，握手完成后（接收方立即、发起方稍后）才确定。
#[derive(Default)]
pub struct RemoteInfo {
    pub identity: Option<Vec<u8>>,
    pub protocol_version: Option<u32>,
}

/// 关闭级联的参数化选项。
#[derive(Debug, Clone, Copy, Default)]
pub struct CloseOptions {
    pub cleanup_endpoint: bool,
    pub remove_endpoint: bool,
    pub being_sick: bool,
    pub force_removal: bool,
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// 一条进程本地的 P2P 连接：发起方或接收方、共享或线程独占、保序或不保序。
pub struct Connection {
    id: u64,
    role: Role,
    shared: bool,
    preserve_order: bool,
    unique_id: u64,
    remote: SyncMutex<RemoteInfo>,
    state: StateSlot,
    closing: AtomicBool,
    stopped: AtomicBool,
    collaborators: Collaborators,
    config: EngineConfig,

    write_half: Arc<AsyncMutex<Option<IoWriteHalf>>>,
    /// 该连接是否跑在 TLS 之上；TLS 写半区不支持非阻塞 `try_write`
    /// （见 [`crate::io_filter::IoWriteHalf::try_write`]），所以这类连接必须
    /// 总是走阻塞同步写路径，不能进入非阻塞自旋/队列模式。
    uses_tls: bool,
    sender_semaphore: SenderSemaphore,
    queue: Arc<SyncMutex<OutgoingQueue>>,
    pusher_notify: Arc<Notify>,
    async_queuing_in_progress: AtomicBool,

    ack_timer: SyncMutex<Option<AckTimerState>>,
    reader_handle: SyncMutex<Option<JoinHandle<()>>>,
    pusher_handle: AsyncMutex<Option<JoinHandle<()>>>,
    idle_handle: SyncMutex<Option<JoinHandle<()>>>,
    ack_handle: SyncMutex<Option<JoinHandle<()>>>,

    /// 握手中协商得到的 domino count；`prefers_thread_owned_outbound` 记录本连接
    /// 是否应当把"domino 传播"偏好告知后续由同一上游发起的出站连接。
    domino_count: AtomicU64,
    prefers_thread_owned_outbound: AtomicBool,
}

impl Connection {
    /// 生产构造：握手完成、真实 socket 已经可用时调用。
    ///
    /// Splits `filter` into independent read/write halves immediately: the write half is
    /// retained by the connection behind a shared lock for the sync/async write paths, and
    /// the read half is handed back to the caller to drive via [`crate::reader::run_reader_loop`]
    /// without ever contending with a writer for the same lock.
    pub fn new(
        role: Role,
        shared: bool,
        preserve_order: bool,
        unique_id: u64,
        filter: IoFilter,
        collaborators: Collaborators,
        config: EngineConfig,
    ) -> (Arc<Self>, IoReadHalf) {
        let uses_tls = filter.is_tls();
        let (read_half, write_half) = filter.split();
        let connection = Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            role,
            shared,
            preserve_order,
            unique_id,
            remote: SyncMutex::new(RemoteInfo::default()),
            state: StateSlot::new(ConnectionState::Idle),
            closing: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            sender_semaphore: SenderSemaphore::new(config.max_connection_senders),
            queue: Arc::new(SyncMutex::new(OutgoingQueue::new())),
            pusher_notify: Arc::new(Notify::new()),
            async_queuing_in_progress: AtomicBool::new(false),
            ack_timer: SyncMutex::new(None),
            reader_handle: SyncMutex::new(None),
            pusher_handle: AsyncMutex::new(None),
            idle_handle: SyncMutex::new(None),
            ack_handle: SyncMutex::new(None),
            domino_count: AtomicU64::new(0),
            prefers_thread_owned_outbound: AtomicBool::new(false),
            collaborators,
            config,
            uses_tls,
            write_half: Arc::new(AsyncMutex::new(Some(write_half))),
        });
        (connection, read_half)
    }

    /// 测试构造：无真实 socket，供单元测试驱动帧解析/调度逻辑。
    #[cfg(test)]
    pub fn new_for_test(id: u64, collaborators: Collaborators, config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            id,
            role: Role::Acceptor,
            shared: false,
            preserve_order: true,
            unique_id: id,
            remote: SyncMutex::new(RemoteInfo::default()),
            state: StateSlot::new(ConnectionState::Idle),
            closing: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            sender_semaphore: SenderSemaphore::new(config.max_connection_senders),
            queue: Arc::new(SyncMutex::new(OutgoingQueue::new())),
            pusher_notify: Arc::new(Notify::new()),
            async_queuing_in_progress: AtomicBool::new(false),
            ack_timer: SyncMutex::new(None),
            reader_handle: SyncMutex::new(None),
            pusher_handle: AsyncMutex::new(None),
            idle_handle: SyncMutex::new(None),
            ack_handle: SyncMutex::new(None),
            domino_count: AtomicU64::new(0),
            prefers_thread_owned_outbound: AtomicBool::new(false),
            collaborators,
            config,
            uses_tls: false,
            write_half: Arc::new(AsyncMutex::new(None)),
        })
    }

    /// 测试构造：同 [`Self::new_for_test`]，但构造一条声称运行在 TLS 之上的
    /// 发起方、保序连接，供写路径判定逻辑的单元测试使用（无需真正的证书/握手）。
    #[cfg(test)]
    pub fn new_for_test_tls_initiator(id: u64, collaborators: Collaborators, config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            id,
            role: Role::Initiator,
            shared: false,
            preserve_order: true,
            unique_id: id,
            remote: SyncMutex::new(RemoteInfo::default()),
            state: StateSlot::new(ConnectionState::Idle),
            closing: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            sender_semaphore: SenderSemaphore::new(config.max_connection_senders),
            queue: Arc::new(SyncMutex::new(OutgoingQueue::new())),
            pusher_notify: Arc::new(Notify::new()),
            async_queuing_in_progress: AtomicBool::new(false),
            ack_timer: SyncMutex::new(None),
            reader_handle: SyncMutex::new(None),
            pusher_handle: AsyncMutex::new(None),
            idle_handle: SyncMutex::new(None),
            ack_handle: SyncMutex::new(None),
            domino_count: AtomicU64::new(0),
            prefers_thread_owned_outbound: AtomicBool::new(false),
            collaborators,
            config,
            uses_tls: true,
            write_half: Arc::new(AsyncMutex::new(None)),
        })
    }

    /// 测试构造：同 [`Self::new_for_test`]，但 `shared` 为真，供共享连接去重
    /// 逻辑的单元测试使用。
    #[cfg(test)]
    pub fn new_for_test_shared(id: u64, preserve_order: bool, collaborators: Collaborators, config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            id,
            role: Role::Acceptor,
            shared: true,
            preserve_order,
            unique_id: id,
            remote: SyncMutex::new(RemoteInfo::default()),
            state: StateSlot::new(ConnectionState::Idle),
            closing: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            sender_semaphore: SenderSemaphore::new(config.max_connection_senders),
            queue: Arc::new(SyncMutex::new(OutgoingQueue::new())),
            pusher_notify: Arc::new(Notify::new()),
            async_queuing_in_progress: AtomicBool::new(false),
            ack_timer: SyncMutex::new(None),
            reader_handle: SyncMutex::new(None),
            pusher_handle: AsyncMutex::new(None),
            idle_handle: SyncMutex::new(None),
            ack_handle: SyncMutex::new(None),
            domino_count: AtomicU64::new(0),
            prefers_thread_owned_outbound: AtomicBool::new(false),
            collaborators,
            config,
            uses_tls: false,
            write_half: Arc::new(AsyncMutex::new(None)),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn shared(&self) -> bool {
        self.shared
    }

    pub fn preserve_order(&self) -> bool {
        self.preserve_order
    }

    pub fn state(&self) -> &StateSlot {
        &self.state
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    pub fn set_remote_identity(&self, identity: Vec<u8>, protocol_version: u32) {
        let mut guard = self.remote.lock();
        guard.identity = Some(identity);
        guard.protocol_version = Some(protocol_version);
    }

    pub fn remote_identity(&self) -> Option<Vec<u8>> {
        self.remote.lock().identity.clone()
    }

    /// 本连接所属协作方句柄中的 ack 分组表，供 direct-ack 发送路径在
    /// `begin_ack_wait` 时登记进连接组使用。
    pub fn ack_groups(&self) -> Arc<AckGroupRegistry> {
        self.collaborators.ack_groups.clone()
    }

    /// 本连接所属协作方句柄中的统计汇聚，供读循环在完成一条入站消息的组装
    /// 后上报 `inc_messages_received` 使用。
    pub fn stats(&self) -> Arc<dyn crate::collaborators::StatisticsSink> {
        self.collaborators.stats.clone()
    }

    pub fn queued_bytes(&self) -> u64 {
        self.queue.lock().queued_bytes()
    }

    /// 新连接在完全不考虑"是否已有推送者接管"时，是否应当走阻塞同步写路径。
    /// TLS 连接总是走这条路径：其写半区不支持非阻塞 `try_write`
    /// （见 [`crate::io_filter::IoWriteHalf::try_write`]），自旋阶段的第一次
    /// 尝试就会返回 `Unsupported` 而不是 `WouldBlock`，非阻塞自旋/队列模式在
    /// TLS 之上根本无法工作。
    fn prefers_blocking_sync(&self) -> bool {
        self.uses_tls || self.role == Role::Acceptor || !self.preserve_order || self.config.async_distribution_timeout.is_zero()
    }

    /// 发送一帧已编码的缓冲。按下面的判定顺序选择同步写出或排队。
    ///
    /// 判定顺序：已有推送者接管 → 直接入队（conflate 时原地替换）；否则若
    /// 属于接收方/不保序/`asyncDistributionTimeout == 0` → 阻塞同步写；
    /// 否则 → 非阻塞自旋，超时后转入队列模式并接管推送者。
    pub async fn send(self: &Arc<Self>, frame: BytesMut, conflation_key: Option<ConflationKey>, ctx: SendContext) -> Result<(), CoreError> {
        if self.is_closing() {
            return Err(cancelled_error(WRITE));
        }

        if self.async_queuing_in_progress.load(Ordering::Acquire) {
            self.enqueue(frame, conflation_key);
            self.pusher_notify.notify_one();
            self.check_slow_receiver_backlog();
            return Ok(());
        }

        if self.prefers_blocking_sync() {
            return self.write_sync(&frame, ctx).await;
        }

        self.state.set(ConnectionState::Sending);
        let mut write_guard = self.write_half.lock().await;
        let write_half = write_guard.as_mut().expect("connection must hold a write half while not closing");
        let outcome = pusher::spin_then_maybe_enqueue(write_half, &frame, self.config.async_distribution_timeout).await?;
        drop(write_guard);

        match outcome {
            pusher::SpinOutcome::WrittenInline => {
                self.collaborators.stats.inc_messages_sent(1);
                Ok(())
            }
            pusher::SpinOutcome::MustEnqueueRemainder { remainder } => {
                // 部分写的消息一旦跨越 distribution timeout 就不再 conflatable。
                self.queue.lock().enqueue_plain(remainder);
                self.collaborators.stats.inc_async_queue_size(1);
                self.ensure_pusher_running().await;
                self.check_slow_receiver_backlog();
                Ok(())
            }
        }
    }

    /// `queuedBytes > asyncMaxQueueSize` 触发慢接收者断连（§4.5）。检查本身
    /// 是无锁快照读，真正的断连在后台任务里完成，不阻塞调用者的发送路径。
    fn check_slow_receiver_backlog(self: &Arc<Self>) {
        if self.queued_bytes() > self.config.async_max_queue_size && !self.closing.load(Ordering::Acquire) {
            let connection = self.clone();
            tokio::spawn(async move {
                connection.disconnect_slow_receiver("queued bytes exceeded asyncMaxQueueSize").await;
            });
        }
    }

    /// 慢接收者断连：请求成员服务移除对端，轮询等待数秒后强制在本地移除连接。
    pub async fn disconnect_slow_receiver(self: &Arc<Self>, reason: &str) {
        if self.closing.load(Ordering::Acquire) {
            return;
        }
        tracing::warn!(connection_id = self.id, reason, "disconnecting slow receiver");
        if let Some(remote) = self.remote_identity() {
            self.collaborators
                .membership
                .request_member_removal(&remote, "Disconnected as a slow-receiver");
        }

        const POLL_INTERVAL: Duration = Duration::from_millis(200);
        const MAX_POLLS: u32 = 25; // ~5s, matches the "several seconds" bound in the spec
        for _ in 0..MAX_POLLS {
            if self.closing.load(Ordering::Acquire) {
                return;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        self.close(CloseOptions {
            cleanup_endpoint: true,
            remove_endpoint: true,
            being_sick: false,
            force_removal: true,
        })
        .await;
    }

    fn enqueue(&self, frame: BytesMut, conflation_key: Option<ConflationKey>) {
        let mut queue = self.queue.lock();
        match conflation_key {
            Some(key) => {
                if matches!(queue.enqueue_keyed(key, frame), crate::queue::EnqueueOutcome::Conflated) {
                    self.collaborators.stats.inc_async_conflated_msgs(1);
                }
            }
            None => queue.enqueue_plain(frame),
        }
    }

    async fn write_sync(&self, frame: &BytesMut, ctx: SendContext) -> Result<(), CoreError> {
        let _permit = self.sender_semaphore.acquire(ctx).await;
        self.state.set(ConnectionState::Sending);
        let mut write_guard = self.write_half.lock().await;
        let write_half = write_guard.as_mut().expect("connection must hold a write half while not closing");
        write_half.write_all(frame).await.map_err(|e| map_io_error(WRITE, e))?;
        self.collaborators.stats.inc_messages_sent(1);
        self.state.set(ConnectionState::Idle);
        Ok(())
    }

    async fn ensure_pusher_running(self: &Arc<Self>) {
        let mut handle_guard = self.pusher_handle.lock().await;
        if handle_guard.is_some() {
            return;
        }
        self.async_queuing_in_progress.store(true, Ordering::Release);

        // The write half is shared via `Arc`, not moved: once a pusher is running, `send`
        // only ever enqueues (see the early-return branch above), so there is no contention
        // between a blocking sync write and the pusher's writes.
        let write_half = self.write_half.clone();
        let queue_for_task = self.queue.clone();
        let notify = self.pusher_notify.clone();
        let timeout = self.config.async_queue_timeout;
        let connection = self.clone();

        let handle = tokio::spawn(async move {
            let outcome = pusher::run_pusher(write_half, queue_for_task, notify, timeout).await;
            connection.on_pusher_finished(outcome).await;
        });
        *handle_guard = Some(handle);
    }

    /// 推送者任务退出后的收尾：正常排空则恢复"可走非阻塞自旋路径"，慢接收者
    /// 空闲超时触发断连，I/O 错误触发整条连接的关闭级联。
    async fn on_pusher_finished(self: &Arc<Self>, outcome: PusherOutcome) {
        self.async_queuing_in_progress.store(false, Ordering::Release);
        *self.pusher_handle.lock().await = None;
        self.pusher_notify.notify_waiters();

        match outcome {
            PusherOutcome::Drained => {}
            PusherOutcome::SlowReceiverIdleTimeout => {
                self.disconnect_slow_receiver("pusher idle past asyncQueueTimeout").await;
            }
            PusherOutcome::IoError(_) => {
                self.close(CloseOptions {
                    cleanup_endpoint: true,
                    remove_endpoint: true,
                    being_sick: false,
                    force_removal: false,
                })
                .await;
            }
        }
    }

    /// 关闭级联，参数化关闭行为。该方法可以安全地从任意任务（包括读者/推送者
    /// 自身）调用，并且幂等——第二次调用在未强制的情况下直接返回。
    pub async fn close(self: &Arc<Self>, options: CloseOptions) {
        if self.closing.swap(true, Ordering::AcqRel) && !options.force_removal {
            return;
        }

        self.stopped.store(true, Ordering::Release);
        // The semaphore itself has no "reject new acquires" primitive; `is_closing()` is
        // checked at the top of `send` so new callers never reach `acquire` after this point.

        if let Some(handle) = self.reader_handle.lock().take() {
            handle.abort();
        }

        {
            let mut write_guard = self.write_half.lock().await;
            if let Some(mut write_half) = write_guard.take() {
                if options.being_sick {
                    let _ = write_half.close().await;
                } else {
                    tokio::spawn(async move {
                        let _ = write_half.close().await;
                    });
                }
            }
        }

        self.queue.lock().drain_for_close();
        self.pusher_notify.notify_waiters();
        if let Some(handle) = self.pusher_handle.lock().await.take() {
            handle.abort();
        }

        if let Some(handle) = self.idle_handle.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.ack_handle.lock().take() {
            handle.abort();
        }

        if options.remove_endpoint || options.cleanup_endpoint {
            self.collaborators.table.remove(self.id, options.force_removal);
        }
    }

    pub fn set_reader_handle(&self, handle: JoinHandle<()>) {
        *self.reader_handle.lock() = Some(handle);
    }

    /// 读循环退出后的收尾：EOF 与 I/O 错误都按"为重连而关闭"处理；`Cancelled`
    /// 意味着关闭级联已经在进行，无需再次触发。
    pub(crate) async fn on_reader_exit(self: &Arc<Self>, exit: ReaderExit) {
        match exit {
            ReaderExit::Cancelled => {}
            ReaderExit::Eof => {
                tracing::debug!(connection_id = self.id, "reader observed EOF, closing for reconnect");
                self.close(CloseOptions {
                    cleanup_endpoint: true,
                    remove_endpoint: true,
                    being_sick: false,
                    force_removal: false,
                })
                .await;
            }
            ReaderExit::Error(err) => {
                tracing::warn!(connection_id = self.id, error = %err, "reader task terminated with an error, closing for reconnect");
                self.close(CloseOptions {
                    cleanup_endpoint: true,
                    remove_endpoint: true,
                    being_sick: false,
                    force_removal: false,
                })
                .await;
            }
        }
    }

    /// 把握手中协商到的 domino count 记录下来；若计数 ≥ 1 且新连接是线程独占
    /// （非共享）的，标记本连接倾向于为后续出站连接优先选用线程独占 socket。
    /// 原始实现里这是跨连接的读者线程本地状态；这里退化为单条连接上可观察的
    /// 标志位，调用方据此决定下一次 `connect_to_peer` 的 `shared` 取值。
    pub fn apply_domino_propagation(&self, domino_count: u32) {
        self.domino_count.store(domino_count as u64, Ordering::Relaxed);
        if domino_count >= 1 && !self.shared {
            self.prefers_thread_owned_outbound.store(true, Ordering::Relaxed);
        }
    }

    pub fn domino_count(&self) -> u32 {
        self.domino_count.load(Ordering::Relaxed) as u32
    }

    pub fn prefers_thread_owned_outbound(&self) -> bool {
        self.prefers_thread_owned_outbound.load(Ordering::Relaxed)
    }

    pub fn set_idle_handle(&self, handle: JoinHandle<()>) {
        *self.idle_handle.lock() = Some(handle);
    }

    pub fn set_ack_handle(&self, handle: JoinHandle<()>) {
        *self.ack_handle.lock() = Some(handle);
    }

    /// 发送方设置自身 `InUse` 且 `ackWaitThreshold > 0` 时调用：记录发送起点并
    /// 登记进连接组，供周期巡检任务与严重告警的兄弟重置使用。
    pub fn start_ack_timer(self: &Arc<Self>, group_id: u64, groups: &AckGroupRegistry) {
        *self.ack_timer.lock() = Some(AckTimerState::start(group_id));
        groups.join(group_id, self);
    }

    pub fn clear_ack_timer(&self) {
        *self.ack_timer.lock() = None;
    }

    /// 便捷入口：对应 §4.7 "发送方设置自身 InUse 且 ackWaitThreshold > 0"
    /// 的触发点——记录等待起点、登记进连接组、启动周期巡检任务，并把任务句柄
    /// 存入本连接供关闭级联统一回收。`ackWaitThreshold == 0` 时不启动任何任务。
    pub fn begin_ack_wait(self: &Arc<Self>, group_id: u64, groups: Arc<AckGroupRegistry>, remote_identity: Vec<u8>) {
        if self.config.ack_wait_threshold.is_zero() {
            return;
        }
        self.start_ack_timer(group_id, &groups);
        let handle = crate::ack_timer::spawn_ack_monitor(self.clone(), self.config.clone(), self.collaborators.clone(), groups, remote_identity);
        self.set_ack_handle(handle);
    }

    /// 巡检一次 ack 计时器；计时器已被清除（ack 已收到）时返回 `None`，
    /// 调用方（[`crate::ack_timer::spawn_ack_monitor`]）据此停止周期任务。
    pub fn poll_ack_timer(
        &self,
        config: &EngineConfig,
        collaborators: &Collaborators,
        groups: &AckGroupRegistry,
        remote_identity: &[u8],
    ) -> Option<AckTimerOutcome> {
        let guard = self.ack_timer.lock();
        let state = guard.as_ref()?;
        Some(crate::ack_timer::poll_once(state, config, collaborators, remote_identity, groups, self.id))
    }

    /// 把起始时间向后推移 `by`，供严重告警把同组兄弟连接的起点整体推后。
    pub fn advance_ack_timer_start(&self, by: Duration) {
        if let Some(state) = self.ack_timer.lock().as_mut() {
            state.advance_start(by);
        }
    }

    #[cfg(test)]
    pub fn ack_timer_started_at(&self) -> Option<MonotonicTimePoint> {
        self.ack_timer.lock().as_ref().map(AckTimerState::started_at)
    }
}

/// 构造一个空闲握手帧所需要的 `NO_MSG_ID` 普通消息头，供 `send` 的调用方
/// 在握手帧之外复用同一套编码路径（文档用途，非公开 API 表面变化）。
pub(crate) fn encode_plain_frame(message_type: MessageType, direct_ack: bool, message_id: u16, payload: &[u8]) -> Result<BytesMut, CoreError> {
    let mut frame = BytesMut::new();
    framing::encode_header(message_type, direct_ack, message_id, payload.len() as u32, &mut frame)?;
    frame.extend_from_slice(payload);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CountingStats, MockConnectionTable, MockDispatcher, MockMembership};

    fn test_collaborators() -> Collaborators {
        Collaborators {
            membership: Arc::new(MockMembership::new(b"local".to_vec())),
            table: Arc::new(MockConnectionTable::default()),
            dispatcher: Arc::new(MockDispatcher::default()),
            stats: Arc::new(CountingStats::default()),
            ack_groups: Arc::new(crate::ack_timer::AckGroupRegistry::new()),
        }
    }

    #[test]
    fn acceptor_connections_always_prefer_blocking_sync_writes() {
        let connection = Connection::new_for_test(1, test_collaborators(), EngineConfig::new());
        assert!(connection.prefers_blocking_sync());
    }

    #[test]
    fn tls_initiator_connections_always_prefer_blocking_sync_writes() {
        // An ordered, async-eligible initiator would otherwise take the non-blocking
        // spin/queue path, but TLS write halves don't support `try_write`.
        let connection = Connection::new_for_test_tls_initiator(1, test_collaborators(), EngineConfig::new());
        assert!(connection.prefers_blocking_sync());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let connection = Connection::new_for_test(1, test_collaborators(), EngineConfig::new());
        connection.close(CloseOptions::default()).await;
        assert!(connection.is_closing());
        // Second call must be a no-op, not panic or double-run the cascade.
        connection.close(CloseOptions::default()).await;
    }
}
