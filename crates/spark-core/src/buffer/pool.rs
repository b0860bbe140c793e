use bytes::BytesMut;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// 缓冲的用途分类，决定归还时落入哪一个空闲列表。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// 长驻的 socket 读写缓冲，容量对齐 `tcpBufferSize`。
    Direct,
    /// 短命的控制帧缓冲（握手、直接 ack 回复），容量对齐 `SMALL_BUFFER_SIZE`。
    Heap,
}

/// 从池中租借出的缓冲；`Drop` 时不会自动归还——调用方必须显式调用
/// [`BufferPool::release`]，以便池能够记录精确的在用计数（连接关闭级联中
/// “释放输入缓冲回池”这一步骤需要可观察）。
#[derive(Debug)]
pub struct PooledBuffer {
    kind: BufferKind,
    bytes: BytesMut,
}

impl PooledBuffer {
    fn new(kind: BufferKind, bytes: BytesMut) -> Self {
        Self { kind, bytes }
    }

    /// 缓冲的分类。
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// 只读访问底层 `BytesMut`。
    pub fn bytes(&self) -> &BytesMut {
        &self.bytes
    }

    /// 可变访问底层 `BytesMut`，供读循环写入/`advance`。
    pub fn bytes_mut(&mut self) -> &mut BytesMut {
        &mut self.bytes
    }

    /// 取出内部 `BytesMut`，用于需要移动所有权的场景（例如直接投递给解码器）；
    /// 取出后该缓冲不再可归还，调用方需要另行申请替换。
    pub fn into_inner(self) -> BytesMut {
        self.bytes
    }
}

/// 单一池（按 [`BufferKind`] 区分）的累计统计。
#[derive(Debug, Default)]
pub struct PoolStats {
    pub acquired_total: u64,
    pub released_total: u64,
    pub allocated_total: u64,
    pub in_use: u64,
}

#[derive(Default)]
struct Counters {
    acquired_total: AtomicU64,
    released_total: AtomicU64,
    allocated_total: AtomicU64,
    in_use: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PoolStats {
        PoolStats {
            acquired_total: self.acquired_total.load(Ordering::Relaxed),
            released_total: self.released_total.load(Ordering::Relaxed),
            allocated_total: self.allocated_total.load(Ordering::Relaxed),
            in_use: self.in_use.load(Ordering::Relaxed),
        }
    }
}

/// 两级字节缓冲池：直接缓冲（`tcpBufferSize`）与堆缓冲（`SMALL_BUFFER_SIZE`）。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 连接表为每条连接的读者分配一个输入缓冲，为每次握手/直接 ack 分配一个控制
///   缓冲；没有池化会在高连接数下产生大量短命大对象分配，拖累 GC 等价的内存
///   子系统（在 Rust 中体现为分配器争用与缓存不友好）。
///
/// ## 逻辑（How）
/// - 每个分类维护一个按容量粗粒度分桶的空闲列表（`Mutex<Vec<BytesMut>>`）；
/// - `acquire` 优先从空闲列表弹出一个容量 `>= min_capacity` 的缓冲并清空内容，
///   找不到则新分配；
/// - `release` 会在归还前 `clear()`，避免残留旧连接数据，再压回对应分类的
///   空闲列表；若空闲列表已经达到 `max_idle_per_kind`，直接丢弃以限制常驻内存。
///
/// ## 契约（What）
/// - `acquire_direct`/`acquire_heap`：租借一块至少 `min_capacity` 字节的缓冲；
/// - `release`：归还缓冲，之后调用方不得再持有其他引用；
/// - `stats`：返回按分类拆分的累计统计，供统计汇聚层上报。
pub struct BufferPool {
    direct_default_capacity: usize,
    heap_default_capacity: usize,
    max_idle_per_kind: usize,
    direct_idle: Mutex<Vec<BytesMut>>,
    heap_idle: Mutex<Vec<BytesMut>>,
    direct_counters: Counters,
    heap_counters: Counters,
}

impl BufferPool {
    /// 构造缓冲池。
    ///
    /// - `direct_default_capacity`：对应配置项 `tcpBufferSize`；
    /// - `heap_default_capacity`：对应配置项 `SMALL_BUFFER_SIZE`（默认 4096）；
    /// - `max_idle_per_kind`：每个分类允许常驻空闲列表中的缓冲数量上限。
    pub fn new(
        direct_default_capacity: usize,
        heap_default_capacity: usize,
        max_idle_per_kind: usize,
    ) -> Self {
        Self {
            direct_default_capacity,
            heap_default_capacity,
            max_idle_per_kind,
            direct_idle: Mutex::new(Vec::new()),
            heap_idle: Mutex::new(Vec::new()),
            direct_counters: Counters::default(),
            heap_counters: Counters::default(),
        }
    }

    /// 租借一块长驻的 socket 读写缓冲，容量至少为 `tcpBufferSize` 与
    /// `min_capacity` 中的较大者。
    pub fn acquire_direct(&self, min_capacity: usize) -> PooledBuffer {
        let capacity = min_capacity.max(self.direct_default_capacity);
        self.acquire(BufferKind::Direct, capacity)
    }

    /// 租借一块短命的控制帧缓冲（握手、直接 ack）。
    pub fn acquire_heap(&self, min_capacity: usize) -> PooledBuffer {
        let capacity = min_capacity.max(self.heap_default_capacity);
        self.acquire(BufferKind::Heap, capacity)
    }

    fn acquire(&self, kind: BufferKind, capacity: usize) -> PooledBuffer {
        let (idle, counters) = self.slot(kind);
        counters.acquired_total.fetch_add(1, Ordering::Relaxed);
        counters.in_use.fetch_add(1, Ordering::Relaxed);

        let mut guard = idle.lock();
        if let Some(pos) = guard.iter().position(|buf| buf.capacity() >= capacity) {
            let buf = guard.swap_remove(pos);
            return PooledBuffer::new(kind, buf);
        }
        drop(guard);
        counters.allocated_total.fetch_add(1, Ordering::Relaxed);
        PooledBuffer::new(kind, BytesMut::with_capacity(capacity))
    }

    /// 归还一块缓冲；内容会被清空但底层容量保留以供复用。
    pub fn release(&self, mut buffer: PooledBuffer) {
        let (idle, counters) = self.slot(buffer.kind);
        counters.released_total.fetch_add(1, Ordering::Relaxed);
        counters.in_use.fetch_sub(1, Ordering::Relaxed);

        buffer.bytes.clear();
        let mut guard = idle.lock();
        if guard.len() < self.max_idle_per_kind {
            guard.push(buffer.bytes);
        }
    }

    /// 返回指定分类的累计统计。
    pub fn stats(&self, kind: BufferKind) -> PoolStats {
        self.slot(kind).1.snapshot()
    }

    fn slot(&self, kind: BufferKind) -> (&Mutex<Vec<BytesMut>>, &Counters) {
        match kind {
            BufferKind::Direct => (&self.direct_idle, &self.direct_counters),
            BufferKind::Heap => (&self.heap_idle, &self.heap_counters),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_reuses_released_buffer_capacity() {
        let pool = BufferPool::new(4096, 256, 8);
        let buf = pool.acquire_direct(1024);
        assert!(buf.bytes().capacity() >= 4096);
        pool.release(buf);

        let stats_before = pool.stats(BufferKind::Direct);
        assert_eq!(stats_before.allocated_total, 1);

        let _buf2 = pool.acquire_direct(1024);
        let stats_after = pool.stats(BufferKind::Direct);
        assert_eq!(stats_after.allocated_total, 1, "second acquire should reuse idle buffer");
        assert_eq!(stats_after.acquired_total, 2);
    }

    #[test]
    fn kinds_do_not_share_idle_lists() {
        let pool = BufferPool::new(4096, 256, 8);
        let heap_buf = pool.acquire_heap(64);
        pool.release(heap_buf);
        assert_eq!(pool.stats(BufferKind::Direct).allocated_total, 0);
        assert_eq!(pool.stats(BufferKind::Heap).allocated_total, 1);
    }

    #[test]
    fn idle_list_respects_max_idle_cap() {
        let pool = BufferPool::new(64, 64, 1);
        let a = pool.acquire_direct(64);
        let b = pool.acquire_direct(64);
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.direct_idle.lock().len(), 1);
    }
}
