//! 出站 conflation 队列：保留先进先出顺序，同 key 的更新原地替换缓冲。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 同一 conflation key 的连续更新（例如同一缓存条目的多次写入）只有最新值
//!   有意义；把旧缓冲原地替换成新缓冲既省去了重新排队的开销，又保证了该
//!   key 首次入队时占据的 FIFO 位置不变，从而维持"其余消息相对顺序不变"的
//!   排序保证。
//!
//! ## 逻辑解析（How）
//! - FIFO 本身只记录"标准缓冲"或"某个 key"两种槽位；key 对应的实际缓冲存放
//!   在旁路的 `keyed_buffers` 映射中。
//! - 对已存在的 key 再次入队：直接替换映射中的缓冲，不改变 FIFO 位置、不计入
//!   新的出队顺序；对首次出现的 key：映射中插入缓冲并在 FIFO 尾部追加一个槽位。
//! - 出队时遇到 key 槽位，从映射里取出并移除对应缓冲；如果映射里已经没有
//!   （说明连接正在关闭清空阶段，buffer 已被置空），跳过这个"残留"槽位继续
//!   弹出下一个，而不是返回空缓冲。
//!
//! ## 契约（What）
//! - `queued_bytes()` 在任意一串 enqueue/dequeue 操作后都等于当前所有存活
//!   条目的剩余字节之和。

use bytes::BytesMut;
use std::collections::{HashMap, VecDeque};

/// 域定义的 conflation 等价标识；引擎本身不解释其含义。
pub type ConflationKey = u64;

enum QueueSlot {
    Plain(BytesMut),
    Keyed(ConflationKey),
}

/// 单条连接的出站队列。非线程安全；调用方（pusher/writer）需要自行加锁。
#[derive(Default)]
pub struct OutgoingQueue {
    fifo: VecDeque<QueueSlot>,
    keyed_buffers: HashMap<ConflationKey, BytesMut>,
    queued_bytes: u64,
}

/// 一次入队的结果，供调用方决定是否上报 conflation 统计。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// 追加了一个新的 FIFO 槽位。
    Appended,
    /// 原地替换了已存在 key 的缓冲，FIFO 位置不变。
    Conflated,
}

impl OutgoingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 入队一个不可 conflate 的标准缓冲。
    pub fn enqueue_plain(&mut self, buf: BytesMut) {
        self.queued_bytes += buf.len() as u64;
        self.fifo.push_back(QueueSlot::Plain(buf));
    }

    /// 入队一个带 conflation key 的缓冲，返回是追加还是原地替换。
    pub fn enqueue_keyed(&mut self, key: ConflationKey, buf: BytesMut) -> EnqueueOutcome {
        if let Some(existing) = self.keyed_buffers.get_mut(&key) {
            self.queued_bytes -= existing.len() as u64;
            self.queued_bytes += buf.len() as u64;
            *existing = buf;
            EnqueueOutcome::Conflated
        } else {
            self.queued_bytes += buf.len() as u64;
            self.keyed_buffers.insert(key, buf);
            self.fifo.push_back(QueueSlot::Keyed(key));
            EnqueueOutcome::Appended
        }
    }

    /// 弹出下一个待发送的缓冲，透明跳过已被清空的残留 key 槽位。
    pub fn pop_next(&mut self) -> Option<BytesMut> {
        loop {
            match self.fifo.pop_front()? {
                QueueSlot::Plain(buf) => {
                    self.queued_bytes -= buf.len() as u64;
                    return Some(buf);
                }
                QueueSlot::Keyed(key) => {
                    if let Some(buf) = self.keyed_buffers.remove(&key) {
                        self.queued_bytes -= buf.len() as u64;
                        return Some(buf);
                    }
                    // 残留槽位：对应缓冲已在排空阶段被置空，继续弹出下一个。
                }
            }
        }
    }

    /// 当前排队字节总数，等于所有存活条目的剩余字节之和。
    pub fn queued_bytes(&self) -> u64 {
        self.queued_bytes
    }

    /// 队列是否已无存活条目（FIFO 中的残留 key 槽位不计入）。
    pub fn is_empty(&self) -> bool {
        self.keyed_buffers.is_empty() && !self.fifo.iter().any(|slot| matches!(slot, QueueSlot::Plain(_)))
    }

    /// 把一个刚刚弹出的标准缓冲放回队首，供"弹出只是为了探测是否为空"的调用方
    /// 在发现队列其实非空时撤销那次弹出，而不是把缓冲丢弃。
    pub fn requeue_front(&mut self, buf: BytesMut) {
        self.queued_bytes += buf.len() as u64;
        self.fifo.push_front(QueueSlot::Plain(buf));
    }

    /// 关闭级联排空：按账目清空但丢弃缓冲内容，不再尝试发送。
    pub fn drain_for_close(&mut self) {
        self.fifo.clear();
        self.keyed_buffers.clear();
        self.queued_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_bytes_matches_sum_of_remaining() {
        let mut q = OutgoingQueue::new();
        q.enqueue_plain(BytesMut::from(&b"hello"[..]));
        q.enqueue_keyed(1, BytesMut::from(&b"world!"[..]));
        assert_eq!(q.queued_bytes(), 5 + 6);
        q.pop_next();
        assert_eq!(q.queued_bytes(), 6);
        q.pop_next();
        assert_eq!(q.queued_bytes(), 0);
    }

    #[test]
    fn conflation_replaces_buffer_in_place_and_preserves_fifo_position() {
        let mut q = OutgoingQueue::new();
        let outcome_k1 = q.enqueue_keyed(10, BytesMut::from(&b"k-v1"[..]));
        assert_eq!(outcome_k1, EnqueueOutcome::Appended);
        q.enqueue_plain(BytesMut::from(&b"plain"[..]));
        let outcome_k2 = q.enqueue_keyed(10, BytesMut::from(&b"k-v2-longer"[..]));
        assert_eq!(outcome_k2, EnqueueOutcome::Conflated);

        // K occupied the earliest FIFO slot, so it must drain before the plain entry.
        let first = q.pop_next().unwrap();
        assert_eq!(&first[..], b"k-v2-longer");
        let second = q.pop_next().unwrap();
        assert_eq!(&second[..], b"plain");
    }

    #[test]
    fn ten_updates_to_one_key_and_one_to_another_yield_two_sends_in_insertion_order() {
        let mut q = OutgoingQueue::new();
        for i in 0..10u32 {
            q.enqueue_keyed(100, BytesMut::from(format!("K-{i}").as_bytes()));
        }
        q.enqueue_keyed(200, BytesMut::from(&b"L-0"[..]));

        let first = q.pop_next().unwrap();
        assert_eq!(&first[..], b"K-9");
        let second = q.pop_next().unwrap();
        assert_eq!(&second[..], b"L-0");
        assert!(q.pop_next().is_none());
    }

    #[test]
    fn drain_for_close_zeroes_queued_bytes() {
        let mut q = OutgoingQueue::new();
        q.enqueue_plain(BytesMut::from(&b"abc"[..]));
        q.drain_for_close();
        assert_eq!(q.queued_bytes(), 0);
        assert!(q.pop_next().is_none());
    }

    #[test]
    fn requeue_front_restores_a_popped_buffer_and_its_byte_count() {
        let mut q = OutgoingQueue::new();
        q.enqueue_plain(BytesMut::from(&b"first"[..]));
        q.enqueue_plain(BytesMut::from(&b"second"[..]));
        let popped = q.pop_next().unwrap();
        q.requeue_front(popped);
        assert_eq!(q.queued_bytes(), 5 + 6);
        let first = q.pop_next().unwrap();
        assert_eq!(&first[..], b"first");
        let second = q.pop_next().unwrap();
        assert_eq!(&second[..], b"second");
    }
}
