//! 就绪/背压语义的权威锚点模块。
//!
//! 集中定义 [`ReadyState`]、[`BusyReason`]、[`RetryAdvice`]，避免读写路径各自
//! 发明平行的繁忙/退避表达，保持统计与日志标签的一致性。
mod ready;

pub use ready::{BusyReason, ReadyState, RetryAdvice};
