//! 监听端（acceptor）与拨号端（initiator）的顶层编排：accept 循环、握手、
//! socket 选项配置、connection-table 登记时序、idle/ack 周期任务挂载。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 前面各模块（框架编解码、握手、读者状态机、写路径、ack 监控、空闲回收）
//!   各自只负责一条已经建立好的连接；真正把监听 socket、拨号重试、握手
//!   超时、连接表登记时序这些"装配线"串起来的，是这里的 [`Listener`] 与
//!   [`connect_to_peer`]。
//!
//! ## 逻辑解析（How）
//! - 接收方：`accept` → 配置 socket 选项 → 读取握手请求 → （可选）安全模式
//!   下阻塞回复直到成员服务确认对端已清除 → 回复 → 构造 `Connection` →
//!   **先登记进连接表，再派发读循环**（数据模型不变量）→ 挂载空闲任务。
//! - 发起方：按 `p2pConnectTimeout` 整体限时、以 `RECONNECT_WAIT_TIME` 为
//!   退避间隔重试 `connect` → 配置 socket 选项 → 按 `handshakeTimeout` 限时
//!   执行握手 → **握手完成后才登记进连接表**（数据模型不变量）→ 挂载空闲
//!   任务；发起方连接不派发常驻读循环，直接 ack 由调用方在发送路径上自行
//!   调用 [`crate::reader::read_ack`]。

use crate::ack_timer::AckGroupRegistry;
use crate::collaborators::{Collaborators, MemberIdentity, UpstreamDispatcher};
use crate::config::EngineConfig;
use crate::connection::{Connection, Role};
use crate::error::{map_io_error, protocol_error, ACCEPT, BIND, CONFIGURE, CONNECT};
use crate::handshake::{self, HandshakeRequest};
use crate::io_filter::{IoFilter, IoReadHalf};
use crate::reader;
use socket2::{SockRef, TcpKeepalive};
use spark_core::prelude::{BufferPool, CoreError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// 握手所用的 TLS 材料：`useSsl` 配置打开时必须持有对应一侧的握手器；`tls`
/// 特性关闭时这个结构体退化为空占位，`Default` 即可构造，调用方不需要按
/// 特性开关分叉自己的代码。
#[derive(Clone, Default)]
pub struct TlsMaterial {
    #[cfg(feature = "tls")]
    pub acceptor: Option<Arc<tokio_rustls::TlsAcceptor>>,
    #[cfg(feature = "tls")]
    pub connector: Option<Arc<tokio_rustls::TlsConnector>>,
}

#[cfg(feature = "tls")]
impl TlsMaterial {
    pub fn acceptor(acceptor: Arc<tokio_rustls::TlsAcceptor>) -> Self {
        Self { acceptor: Some(acceptor), connector: None }
    }

    pub fn connector(connector: Arc<tokio_rustls::TlsConnector>) -> Self {
        Self { acceptor: None, connector: Some(connector) }
    }
}

/// 按 `config.use_ssl` 在明文 socket 上（可选）完成 TLS 服务端握手，返回统一
/// 的 [`IoFilter`]。`tls` 特性关闭时，打开 `use_ssl` 是配置错误而非静默降级。
async fn wrap_acceptor_filter(stream: TcpStream, config: &EngineConfig, tls: &TlsMaterial) -> Result<IoFilter, CoreError> {
    if !config.use_ssl {
        return Ok(IoFilter::plain(stream));
    }
    #[cfg(feature = "tls")]
    {
        let acceptor = tls.acceptor.clone().ok_or_else(|| protocol_error("useSsl is enabled but no TLS acceptor was configured"))?;
        let tls_stream = acceptor.accept(stream).await.map_err(|e| map_io_error(CONFIGURE, e))?;
        Ok(IoFilter::tls(tokio_rustls::TlsStream::Server(tls_stream)))
    }
    #[cfg(not(feature = "tls"))]
    {
        let _ = tls;
        Err(protocol_error("useSsl is enabled but this build was compiled without the tls feature"))
    }
}

/// 按 `config.use_ssl` 在明文 socket 上（可选）完成 TLS 客户端握手，返回统一
/// 的 [`IoFilter`]。没有可用的域名时，用对端 IP 地址作为 `ServerName`。
async fn wrap_connector_filter(stream: TcpStream, addr: SocketAddr, config: &EngineConfig, tls: &TlsMaterial) -> Result<IoFilter, CoreError> {
    if !config.use_ssl {
        return Ok(IoFilter::plain(stream));
    }
    #[cfg(feature = "tls")]
    {
        let connector = tls.connector.clone().ok_or_else(|| protocol_error("useSsl is enabled but no TLS connector was configured"))?;
        let server_name = rustls_pki_types::ServerName::from(addr.ip());
        let tls_stream = connector.connect(server_name, stream).await.map_err(|e| map_io_error(CONFIGURE, e))?;
        Ok(IoFilter::tls(tokio_rustls::TlsStream::Client(tls_stream)))
    }
    #[cfg(not(feature = "tls"))]
    {
        let _ = (addr, tls);
        Err(protocol_error("useSsl is enabled but this build was compiled without the tls feature"))
    }
}

static NEXT_UNIQUE_ID: AtomicU64 = AtomicU64::new(1);

/// 发起方连接的自增 `uniqueId`，进程内单调。
pub fn next_unique_id() -> u64 {
    NEXT_UNIQUE_ID.fetch_add(1, Ordering::Relaxed)
}

/// 在每个新建立的 socket 上设置 keep-alive 与 no-delay（§6："TCP 保活与
/// 无延迟在每个 socket 上都会设置"），并按角色把 `tcpBufferSize`/
/// `SMALL_BUFFER_SIZE` 分配给发送/接收缓冲：接收方的发送缓冲与发起方的
/// 接收缓冲都收紧为 `SMALL_BUFFER_SIZE`，因为那一侧的流量本就是小块的
/// ack/控制消息。
fn configure_socket(stream: &TcpStream, config: &EngineConfig, role: Role) -> Result<(), CoreError> {
    let sock = SockRef::from(stream);
    sock.set_nodelay(true).map_err(|e| map_io_error(CONFIGURE, e))?;
    sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(Duration::from_secs(60)))
        .map_err(|e| map_io_error(CONFIGURE, e))?;

    let (send_buf, recv_buf) = match role {
        Role::Acceptor => (config.small_buffer_size, config.tcp_buffer_size),
        Role::Initiator => (config.tcp_buffer_size, config.small_buffer_size),
    };
    sock.set_send_buffer_size(send_buf).map_err(|e| map_io_error(CONFIGURE, e))?;
    sock.set_recv_buffer_size(recv_buf).map_err(|e| map_io_error(CONFIGURE, e))?;
    Ok(())
}

/// 一条已完成握手并登记进连接表的发起方连接，附带其直接 ack 读半区。发起方
/// 连接没有常驻读循环，`read_half` 由调用方在每次直接 ack 发送后自行驱动
/// [`crate::reader::read_ack`]。
pub struct EstablishedConnection {
    pub connection: Arc<Connection>,
    pub read_half: IoReadHalf,
}

impl EstablishedConnection {
    /// 在这条发起方连接上完整驱动一次 direct-ack 发送：写出携带直接 ack 标志的
    /// `frame`，（当 `ackWaitThreshold > 0` 时）登记进 ack 分组并启动巡检任务，
    /// 然后同步读取该 ack 的回复。回复到达或读取失败都会清除 ack 计时器
    /// （见 [`crate::reader::read_ack`]），调用方不需要自己收尾。
    pub async fn send_direct_ack(
        &mut self,
        frame: bytes::BytesMut,
        conflation_key: Option<crate::queue::ConflationKey>,
        ctx: crate::writer::SendContext,
        ack_group_id: u64,
    ) -> Result<Vec<u8>, CoreError> {
        self.connection.send(frame, conflation_key, ctx).await?;

        let remote_identity = self.connection.remote_identity().unwrap_or_default();
        self.connection
            .begin_ack_wait(ack_group_id, self.connection.ack_groups(), remote_identity);

        reader::read_ack(&self.connection, &mut self.read_half).await
    }
}

/// 接收端监听器：绑定端口、跑 accept 循环、为每个入站 socket 执行握手装配线。
pub struct Listener {
    listener: TcpListener,
    collaborators: Collaborators,
    config: EngineConfig,
    buffer_pool: Arc<BufferPool>,
    dispatcher: Arc<dyn UpstreamDispatcher>,
    local_product_version: u32,
    tls: TlsMaterial,
}

impl Listener {
    pub async fn bind(
        addr: SocketAddr,
        collaborators: Collaborators,
        config: EngineConfig,
        buffer_pool: Arc<BufferPool>,
        dispatcher: Arc<dyn UpstreamDispatcher>,
        local_product_version: u32,
        tls: TlsMaterial,
    ) -> Result<Self, CoreError> {
        let listener = TcpListener::bind(addr).await.map_err(|e| map_io_error(BIND, e))?;
        Ok(Self {
            listener,
            collaborators,
            config,
            buffer_pool,
            dispatcher,
            local_product_version,
            tls,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// 跑 accept 循环，每个入站连接各自在独立任务中完成握手装配线，互不阻塞。
    /// accept 本身的瞬时错误（例如 fd 耗尽）只记录日志并继续；这与读者的
    /// "瞬时 I/O 故障重试/继续" 策略一致。
    pub fn spawn_accept_loop(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let (stream, _peer) = match self.listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %map_io_error(ACCEPT, e), "accept failed, continuing");
                        continue;
                    }
                };

                let collaborators = self.collaborators.clone();
                let config = self.config.clone();
                let buffer_pool = self.buffer_pool.clone();
                let dispatcher = self.dispatcher.clone();
                let product_version = self.local_product_version;
                let tls = self.tls.clone();
                tokio::spawn(async move {
                    if let Err(e) = accept_connection(stream, collaborators, config, buffer_pool, dispatcher, product_version, tls).await {
                        tracing::warn!(error = %e, "inbound handshake failed, dropping connection");
                    }
                });
            }
        })
    }
}

/// 一条入站 socket 的完整装配线：配置选项、握手、（安全模式）成员确认、
/// 回复、登记、挂载空闲任务、派发读循环。
async fn accept_connection(
    stream: TcpStream,
    collaborators: Collaborators,
    config: EngineConfig,
    buffer_pool: Arc<BufferPool>,
    dispatcher: Arc<dyn UpstreamDispatcher>,
    local_product_version: u32,
    tls: TlsMaterial,
) -> Result<(), CoreError> {
    configure_socket(&stream, &config, Role::Acceptor)?;
    let mut filter = wrap_acceptor_filter(stream, &config, &tls).await?;

    let info = tokio::time::timeout(config.handshake_timeout, handshake::read_initiator_request(&mut filter))
        .await
        .map_err(|_| protocol_error("handshake request not received within handshakeTimeout"))??;

    if collaborators.membership.is_shunned(&info.remote_identity) {
        tracing::debug!(remote = ?info.remote_identity, "refusing handshake from shunned peer");
        return Err(protocol_error("peer is shunned by membership"));
    }

    // Secure mode: hold the reply back until membership confirms the remote has cleared
    // its admission check, bounded by the same handshake timeout as the rest of the exchange.
    if config.use_ssl {
        wait_for_membership_clearance(&collaborators, &info.remote_identity, config.handshake_timeout).await?;
    }

    handshake::send_acceptor_reply(&mut filter, &config, local_product_version).await?;

    let (connection, read_half) = Connection::new(
        Role::Acceptor,
        info.shared,
        info.preserve_order,
        info.unique_id,
        filter,
        collaborators.clone(),
        config.clone(),
    );
    connection.set_remote_identity(info.remote_identity.clone(), info.remote_product_version);
    connection.apply_domino_propagation(info.domino_count);

    // Data-model invariant: at most one live shared connection per (remote, preserveOrder)
    // triple. A reconnect from the same peer must retire the old entry before the new one
    // takes its place in the table, or both stay live forever.
    close_stale_shared_connection(&collaborators, info.shared, &info.remote_identity, info.preserve_order).await;

    // Data-model invariant: a receiver connection is registered before its reader dispatches
    // any message.
    collaborators.table.register(connection.clone());

    spawn_idle_watch(&connection, &config);
    spawn_reader(connection, read_half, buffer_pool.acquire_direct(config.tcp_buffer_size), dispatcher, buffer_pool);

    Ok(())
}

/// 安全模式下的握手回复门禁：轮询成员服务直至确认对端已清除检查，或超时。
async fn wait_for_membership_clearance(collaborators: &Collaborators, remote_identity: &[u8], bound: Duration) -> Result<(), CoreError> {
    const POLL_INTERVAL: Duration = Duration::from_millis(50);
    let deadline = tokio::time::Instant::now() + bound;
    loop {
        if collaborators.membership.member_exists(remote_identity) {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            collaborators.membership.suspect_member(remote_identity, "membership clearance timed out in secure handshake");
            return Err(protocol_error("secure-mode membership clearance timed out"));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// 数据模型不变量的守护者：同一 `(remote, preserveOrder)` 三元组至多一条活跃
/// 共享连接。登记新连接前，先在连接表里查找是否已有一条旧的活跃连接占着
/// 这把 key；若有，强制关闭它再放行新连接登记，避免两条连接都认为自己是
/// 该三元组的代表从而同时收发消息。
async fn close_stale_shared_connection(collaborators: &Collaborators, shared: bool, remote_identity: &[u8], preserve_order: bool) {
    if !shared {
        return;
    }
    if let Some(stale) = collaborators.table.find_shared(remote_identity, preserve_order) {
        tracing::debug!(remote = ?remote_identity, preserve_order, stale_id = stale.id(), "retiring stale shared connection for reconnecting peer");
        stale
            .close(crate::connection::CloseOptions {
                cleanup_endpoint: true,
                remove_endpoint: true,
                being_sick: false,
                force_removal: true,
            })
            .await;
    }
}

/// 发起方建连：按 `RECONNECT_WAIT_TIME` 退避重试 `connect`，整体限时
/// `p2pConnectTimeout`；连接建立后按 `handshakeTimeout` 限时执行握手。
/// 握手完成后才登记进连接表（数据模型不变量），且不派发常驻读循环。
pub async fn connect_to_peer(
    addr: SocketAddr,
    remote_identity: MemberIdentity,
    shared: bool,
    preserve_order: bool,
    domino_count: u32,
    collaborators: Collaborators,
    config: EngineConfig,
    tls: TlsMaterial,
) -> Result<EstablishedConnection, CoreError> {
    let local_identity = collaborators.membership.local_identity();
    let connect_deadline = tokio::time::Instant::now() + config.p2p_connect_timeout;

    let stream = loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => break stream,
            Err(e) => {
                if tokio::time::Instant::now() >= connect_deadline {
                    return Err(map_io_error(CONNECT, e));
                }
                tracing::debug!(addr = %addr, error = %e, "connect attempt failed, retrying after backoff");
                tokio::time::sleep(config.reconnect_wait_time).await;
            }
        }
    };

    configure_socket(&stream, &config, Role::Initiator)?;
    let mut filter = wrap_connector_filter(stream, addr, &config, &tls).await?;

    let unique_id = next_unique_id();
    let request = HandshakeRequest {
        local_identity,
        shared,
        preserve_order,
        unique_id,
        product_version: 1,
        domino_count,
    };

    let handshake_result = tokio::time::timeout(config.handshake_timeout, handshake::perform_initiator_handshake(&mut filter, request)).await;
    let reply = match handshake_result {
        Ok(Ok(reply)) => reply,
        Ok(Err(e)) => {
            collaborators.membership.suspect_member(&remote_identity, "handshake failed");
            return Err(e);
        }
        Err(_) => {
            collaborators.membership.suspect_member(&remote_identity, "handshake wait expired");
            return Err(protocol_error("handshake did not complete within handshakeTimeout"));
        }
    };

    let remote_product_version = reply.async_info.map(|info| info.acceptor_product_version).unwrap_or(0);

    let (connection, read_half) = Connection::new(
        Role::Initiator,
        shared,
        preserve_order,
        unique_id,
        filter,
        collaborators.clone(),
        config.clone(),
    );
    connection.set_remote_identity(remote_identity.clone(), remote_product_version);

    // Data-model invariant: at most one live shared connection per (remote, preserveOrder)
    // triple. Retire the old entry from a previous connect before this one takes its place.
    close_stale_shared_connection(&collaborators, shared, &remote_identity, preserve_order).await;

    // Data-model invariant: a sender connection is registered only after its handshake
    // completes.
    collaborators.table.register(connection.clone());

    spawn_idle_watch(&connection, &config);

    Ok(EstablishedConnection { connection, read_half })
}

/// 为一条新连接挂载空闲回收任务，除非其 `shared && !preserveOrder`（成员
/// 失败检测通道）被豁免。
fn spawn_idle_watch(connection: &Arc<Connection>, config: &EngineConfig) {
    if crate::idle_reaper::is_exempt(connection.shared(), connection.preserve_order()) {
        return;
    }
    let handle = crate::idle_reaper::spawn_idle_task(connection.clone(), config.idle_timeout);
    connection.set_idle_handle(handle);
}

/// 为一条接收方连接派发常驻读循环；读循环退出后把输入缓冲归还缓冲池、
/// 驱动连接的关闭级联收尾，并把监督任务的句柄挂到连接上供关闭级联回收。
fn spawn_reader(
    connection: Arc<Connection>,
    read_half: IoReadHalf,
    input: spark_core::prelude::PooledBuffer,
    dispatcher: Arc<dyn UpstreamDispatcher>,
    buffer_pool: Arc<BufferPool>,
) {
    let supervised = connection.clone();
    let handle = tokio::spawn(async move {
        let (exit, buffer) = reader::run_reader_loop(supervised.clone(), read_half, input, dispatcher).await;
        buffer_pool.release(buffer);
        supervised.on_reader_exit(exit).await;
    });
    connection.set_reader_handle(handle);
}

/// 发送方在设置自身 `InUse` 且 `ackWaitThreshold > 0` 时调用的便捷入口，
/// 直接转发到 [`Connection::begin_ack_wait`]，供调用方在拨号流程之外统一
/// 引用这一个入口函数名。
pub fn begin_ack_wait(connection: &Arc<Connection>, group_id: u64, groups: Arc<AckGroupRegistry>, remote_identity: Vec<u8>) {
    connection.begin_ack_wait(group_id, groups, remote_identity);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CountingStats, MockConnectionTable, MockDispatcher, MockMembership};

    #[tokio::test]
    async fn acceptor_registers_connection_before_returning() {
        let config = EngineConfig::new();
        let buffer_pool = Arc::new(BufferPool::new(config.tcp_buffer_size, config.small_buffer_size, 4));
        let table = Arc::new(MockConnectionTable::default());
        let acceptor_collaborators = Collaborators {
            membership: Arc::new(MockMembership::new(b"acceptor".to_vec())),
            table: table.clone(),
            dispatcher: Arc::new(MockDispatcher::default()),
            stats: Arc::new(CountingStats::default()),
            ack_groups: Arc::new(AckGroupRegistry::new()),
        };
        let dispatcher = Arc::new(MockDispatcher::default());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let acceptor_task = {
            let collaborators = acceptor_collaborators.clone();
            let config = config.clone();
            let buffer_pool = buffer_pool.clone();
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                let (stream, _) = listener.accept().await.unwrap();
                accept_connection(stream, collaborators, config, buffer_pool, dispatcher, 2, TlsMaterial::default()).await
            })
        };

        let req = HandshakeRequest {
            local_identity: b"initiator".to_vec(),
            shared: false,
            preserve_order: true,
            unique_id: 7,
            product_version: 1,
            domino_count: 0,
        };
        let client = TcpStream::connect(addr).await.unwrap();
        let mut initiator_filter = IoFilter::plain(client);
        let reply = handshake::perform_initiator_handshake(&mut initiator_filter, req).await.unwrap();
        assert!(reply.async_info.is_some());

        acceptor_task.await.unwrap().unwrap();
        assert_eq!(table.registered.lock().len(), 1);
    }

    #[tokio::test]
    async fn send_direct_ack_composes_send_begin_ack_wait_and_read_ack() {
        use crate::framing::{self, MessageType};
        use crate::writer::SendContext;
        use bytes::{BufMut, BytesMut};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let config = EngineConfig::new();
        let collaborators = Collaborators {
            membership: Arc::new(MockMembership::new(b"initiator".to_vec())),
            table: Arc::new(MockConnectionTable::default()),
            dispatcher: Arc::new(MockDispatcher::default()),
            stats: Arc::new(CountingStats::default()),
            ack_groups: Arc::new(AckGroupRegistry::new()),
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let peer_task = tokio::spawn(async move {
            let (mut peer, _) = listener.accept().await.unwrap();

            // Read the direct-ack-flagged request frame the test sends below.
            let mut header = [0u8; framing::HEADER_LEN];
            peer.read_exact(&mut header).await.unwrap();
            let mut cursor = &header[..];
            let request_header = framing::decode_header(&mut cursor).unwrap();
            assert!(request_header.direct_ack);
            let mut payload = vec![0u8; request_header.payload_len as usize];
            peer.read_exact(&mut payload).await.unwrap();

            // Reply with a single-frame ack.
            let mut reply = BytesMut::new();
            framing::encode_header(MessageType::Normal, false, framing::NO_MSG_ID, 5, &mut reply).unwrap();
            reply.put_slice(b"ack!!");
            peer.write_all(&reply).await.unwrap();
        });

        let (connection, read_half) = Connection::new(
            Role::Initiator,
            false,
            true,
            1,
            IoFilter::plain(TcpStream::connect(addr).await.unwrap()),
            collaborators,
            config,
        );
        let mut established = EstablishedConnection { connection, read_half };

        let mut frame = BytesMut::new();
        framing::encode_header(MessageType::Normal, true, framing::NO_MSG_ID, 3, &mut frame).unwrap();
        frame.put_slice(b"req");

        let reply = established.send_direct_ack(frame, None, SendContext::default(), 1).await.unwrap();
        peer_task.await.unwrap();

        assert_eq!(reply, b"ack!!".to_vec());
        // `read_ack` clears the ack timer once the reply lands, so nothing is left armed
        // for the periodic monitor to escalate against.
        assert!(established.connection.ack_timer_started_at().is_none());
    }

    #[tokio::test]
    async fn close_stale_shared_connection_retires_the_prior_connection_for_the_same_triple() {
        use crate::table::ConnectionTable;

        let table = Arc::new(ConnectionTable::new());
        let collaborators = Collaborators {
            membership: Arc::new(MockMembership::new(b"local".to_vec())),
            table: table.clone(),
            dispatcher: Arc::new(MockDispatcher::default()),
            stats: Arc::new(CountingStats::default()),
            ack_groups: Arc::new(AckGroupRegistry::new()),
        };
        let config = EngineConfig::new();

        let stale = Connection::new_for_test_shared(1, true, collaborators.clone(), config.clone());
        stale.set_remote_identity(b"peer-a".to_vec(), 1);
        table.register(stale.clone());

        close_stale_shared_connection(&collaborators, true, b"peer-a", true).await;

        assert!(stale.is_closing());
        assert!(table.get(1).is_none());
    }

    #[tokio::test]
    async fn close_stale_shared_connection_is_a_no_op_when_nothing_matches() {
        use crate::table::ConnectionTable;

        let table = Arc::new(ConnectionTable::new());
        let collaborators = Collaborators {
            membership: Arc::new(MockMembership::new(b"local".to_vec())),
            table: table.clone(),
            dispatcher: Arc::new(MockDispatcher::default()),
            stats: Arc::new(CountingStats::default()),
            ack_groups: Arc::new(AckGroupRegistry::new()),
        };

        // No entry registered yet: must return without panicking.
        close_stale_shared_connection(&collaborators, true, b"peer-a", true).await;
        assert_eq!(table.len(), 0);
    }
}
