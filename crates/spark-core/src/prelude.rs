//! 便于下游引擎 crate 一次性导入的常用类型集合。
//!
//! ```ignore
//! use spark_core::prelude::*;
//! ```

pub use crate::buffer::{BufferKind, BufferPool, PoolStats, PooledBuffer};
pub use crate::contract::{CallContext, CallView, Cancellation, Deadline};
pub use crate::error::{CoreError, ErrorCategory, ErrorCause, Result};
pub use crate::status::{BusyReason, ReadyState, RetryAdvice};
pub use crate::time::MonotonicTimePoint;
