//! 连接级缓冲池：按“直接/堆”两类大小可配置的字节缓冲提供租借/归还能力。
//!
//! # 设计背景（Why）
//! - 读者的输入缓冲与握手/ack 等控制帧缓冲具有截然不同的生命周期与大小分布：
//!   前者长驻、与 `tcpBufferSize` 对齐；后者短命、体积固定且远小于前者。统一的
//!   池化入口让连接表可以在两类负载间共享回收策略而不必各自实现。
//! - 沿用“直接缓冲 vs 堆缓冲”的概念区分：直接缓冲池面向长驻的 socket 读写路径，
//!   堆缓冲池面向握手/ack 等临时控制帧；两者均由 `BytesMut` 承载，区分只体现在
//!   各自的大小类与释放策略上，不依赖平台相关的堆外分配。
mod pool;

pub use pool::{BufferKind, BufferPool, PoolStats, PooledBuffer};
