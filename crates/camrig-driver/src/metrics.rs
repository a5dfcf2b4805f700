//! 总线事务指标
//!
//! 原子计数器，可在任意线程读取，不引入锁竞争。

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct BusMetrics {
    /// 完成的事务总数（含失败）
    pub transactions: AtomicU64,

    /// 批量读次数
    pub bulk_reads: AtomicU64,

    /// 批量写次数
    pub bulk_writes: AtomicU64,

    /// 通信失败次数（传输错误或全部无应答）
    pub communication_errors: AtomicU64,

    /// 部分轴无应答的批量读次数
    pub partial_reads: AtomicU64,

    /// 批量读中缺失的轴结果总数
    pub absent_results: AtomicU64,

    /// 丢弃的损坏状态包
    pub corrupt_packets: AtomicU64,
}

impl BusMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BusMetricsSnapshot {
        BusMetricsSnapshot {
            transactions: self.transactions.load(Ordering::Relaxed),
            bulk_reads: self.bulk_reads.load(Ordering::Relaxed),
            bulk_writes: self.bulk_writes.load(Ordering::Relaxed),
            communication_errors: self.communication_errors.load(Ordering::Relaxed),
            partial_reads: self.partial_reads.load(Ordering::Relaxed),
            absent_results: self.absent_results.load(Ordering::Relaxed),
            corrupt_packets: self.corrupt_packets.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.transactions.store(0, Ordering::Relaxed);
        self.bulk_reads.store(0, Ordering::Relaxed);
        self.bulk_writes.store(0, Ordering::Relaxed);
        self.communication_errors.store(0, Ordering::Relaxed);
        self.partial_reads.store(0, Ordering::Relaxed);
        self.absent_results.store(0, Ordering::Relaxed);
        self.corrupt_packets.store(0, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusMetricsSnapshot {
    pub transactions: u64,
    pub bulk_reads: u64,
    pub bulk_writes: u64,
    pub communication_errors: u64,
    pub partial_reads: u64,
    pub absent_results: u64,
    pub corrupt_packets: u64,
}

impl BusMetricsSnapshot {
    /// 通信失败率（百分比），无事务时为 0
    pub fn error_rate(&self) -> f64 {
        if self.transactions == 0 {
            return 0.0;
        }
        (self.communication_errors as f64 / self.transactions as f64) * 100.0
    }
}
