#![doc = r#"
# spark-core

分布式数据网格 P2P 通信层共享的核心契约层。

聚合连接生命周期中跨模块复用的基础类型：取消/截止原语（[`contract`]）、
稳定错误分类（[`error`]）、背压/就绪状态词汇（[`status`]）、单调时钟时间点
（[`time`]）与连接级字节缓冲池（[`buffer`]）。上层的传输引擎据此构建握手、
读者状态机、同步/异步写路径与连接表，而不必各自重新发明这些基础概念。
"#]
#![forbid(unsafe_code)]

pub mod buffer;
pub mod contract;
pub mod error;
pub mod prelude;
pub mod status;
pub mod time;

pub use contract::{CallContext, CallView, Cancellation, Deadline};
pub use error::{CoreError, ErrorCategory, ErrorCause, Result};
pub use status::{BusyReason, ReadyState, RetryAdvice};
pub use time::MonotonicTimePoint;
