//! 定义 PostgreSQL sink 的内部诊断与指标。
//!
//! 每个批处理引擎持有一个 `Diagnostics` 实例，通过
//! [`PostgreSqlSink::diagnostics`](crate::PostgreSqlSink::diagnostics) 对外暴露快照。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 内部诊断与指标数据结构。
///
/// 使用原子操作确保线程安全。
#[derive(Debug, Default)]
pub struct Diagnostics {
    /// 创建时间
    start_time: Option<Instant>,

    /// 提交的日志事件总数（包括停止后被拒绝的）
    events_submitted: AtomicU64,

    /// 已写入数据库的日志事件数
    events_written: AtomicU64,

    /// 因刷新失败而丢弃的日志事件数
    events_dropped_error: AtomicU64,

    /// 停止后提交或停机超时时仍在缓冲区、被丢弃的日志事件数
    events_dropped_stopped: AtomicU64,

    /// 刷新尝试次数
    flush_attempts: AtomicU64,

    /// 刷新失败次数
    flush_failures: AtomicU64,

    /// 已提交的批量操作次数
    bulk_operations: AtomicU64,
}

/// 诊断数据的快照，用于外部查询。
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticsSnapshot {
    pub uptime: Option<Duration>,
    pub events_submitted: u64,
    pub events_written: u64,
    pub events_dropped_error: u64,
    pub events_dropped_stopped: u64,
    pub flush_attempts: u64,
    pub flush_failures: u64,
    pub bulk_operations: u64,

    /// 总丢弃事件数（失败 + 停止后）
    pub total_events_dropped: u64,

    /// 写入成功率（百分比）
    pub success_rate_percent: f64,
}

impl DiagnosticsSnapshot {
    /// 仍在缓冲区或正在写入的事件数
    pub fn events_pending(&self) -> u64 {
        self.events_submitted
            .saturating_sub(self.events_written)
            .saturating_sub(self.total_events_dropped)
    }
}

impl Diagnostics {
    /// 创建新的诊断实例。
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn increment_events_submitted(&self) {
        self.events_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_events_written(&self, count: u64) {
        self.events_written.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_events_dropped_error(&self, count: u64) {
        self.events_dropped_error.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_events_dropped_stopped(&self, count: u64) {
        self.events_dropped_stopped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_flush_attempts(&self) {
        self.flush_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_flush_failures(&self) {
        self.flush_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_bulk_operations(&self) {
        self.bulk_operations.fetch_add(1, Ordering::Relaxed);
    }

    /// 获取诊断数据的快照。
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let events_written = self.events_written.load(Ordering::Relaxed);
        let events_dropped_error = self.events_dropped_error.load(Ordering::Relaxed);
        let events_dropped_stopped = self.events_dropped_stopped.load(Ordering::Relaxed);
        let total_events_dropped = events_dropped_error + events_dropped_stopped;

        let success_rate_percent = if events_written + total_events_dropped > 0 {
            (events_written as f64 / (events_written + total_events_dropped) as f64) * 100.0
        } else {
            100.0
        };

        DiagnosticsSnapshot {
            uptime: self.start_time.map(|start| start.elapsed()),
            events_submitted: self.events_submitted.load(Ordering::Relaxed),
            events_written,
            events_dropped_error,
            events_dropped_stopped,
            flush_attempts: self.flush_attempts.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            bulk_operations: self.bulk_operations.load(Ordering::Relaxed),
            total_events_dropped,
            success_rate_percent,
        }
    }

    /// 重置所有计数器（主要用于测试）。
    pub fn reset(&self) {
        self.events_submitted.store(0, Ordering::Relaxed);
        self.events_written.store(0, Ordering::Relaxed);
        self.events_dropped_error.store(0, Ordering::Relaxed);
        self.events_dropped_stopped.store(0, Ordering::Relaxed);
        self.flush_attempts.store(0, Ordering::Relaxed);
        self.flush_failures.store(0, Ordering::Relaxed);
        self.bulk_operations.store(0, Ordering::Relaxed);
    }
}
