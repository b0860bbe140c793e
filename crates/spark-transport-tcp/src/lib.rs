#![doc = r#"
# spark-p2p-engine

分布式数据网格的点对点 TCP 连接引擎。

负责一件事：在集群成员之间的长连接 TCP 套接字上，用带版本号的头部给消息
成帧、跑一套自定义握手、驱动同步/异步（conflation）两种写路径、运行带
direct-ack 快速路径的读者状态机，并把 ack 超时与空闲超时两类失败检测接入
共享连接表。成员视图维护、消息路由策略、加密密钥管理都不属于这个引擎，
分别由 [`collaborators::MembershipContract`]、上游分发器与 I/O 过滤器负责。
"#]
#![forbid(unsafe_code)]

pub mod ack_timer;
pub mod collaborators;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod framing;
pub mod handshake;
pub mod idle_reaper;
pub mod io_filter;
pub mod pusher;
pub mod queue;
pub mod reader;
pub mod state;
pub mod table;
pub mod writer;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use ack_timer::AckGroupRegistry;
pub use collaborators::{Collaborators, ConnectionTableContract, InboundMessage, MembershipContract, StatisticsSink, UpstreamDispatcher};
pub use config::{EngineConfig, TestHooks};
pub use connection::{CloseOptions, Connection, Role};
pub use engine::{connect_to_peer, EstablishedConnection, Listener, TlsMaterial};
pub use framing::{FrameHeader, MessageType, HANDSHAKE_VERSION, NO_MSG_ID};
pub use table::ConnectionTable;
