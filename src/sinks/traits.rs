//! Sink Traits
//!
//! 批处理引擎与数据库之间的两个接缝：
//!
//! - `BatchedSink`: 接收一批事件并写出，由 [`BatchingEngine`](super::batching::BatchingEngine) 驱动
//! - `BulkCopyClient`: 以单次批量操作提交一批已准备好的行
//!
//! # 使用示例
//!
//! ```rust
//! use quantum_pg_sink::sinks::traits::BulkCopyClient;
//! use quantum_pg_sink::sinks::database::BulkLoad;
//! use quantum_pg_sink::Result;
//! use async_trait::async_trait;
//!
//! #[derive(Debug)]
//! struct CountingClient;
//!
//! #[async_trait]
//! impl BulkCopyClient for CountingClient {
//!     async fn copy_rows(&self, load: BulkLoad) -> Result<u64> {
//!         Ok(load.rows.len() as u64)
//!     }
//! }
//! ```

use async_trait::async_trait;
use std::fmt::Debug;

use crate::core::event::LogEvent;
use crate::error::Result;
use crate::sinks::database::BulkLoad;

/// 批量写出的目标
///
/// `emit_batch` 返回的错误由引擎上报到 self-log，不会传递给生产者。
#[async_trait]
pub trait BatchedSink: Send + Sync + Debug + 'static {
    /// 用于 self-log 和 tracing 的组件名
    fn name(&self) -> String;

    /// 按提交顺序写出一批事件
    async fn emit_batch(&self, events: Vec<LogEvent>) -> Result<()>;
}

/// 批量行写入客户端
///
/// 一次调用对应一次批量操作：要么全部行都已提交，要么返回错误且不提交任何行。
#[async_trait]
pub trait BulkCopyClient: Send + Sync + Debug {
    /// 提交所有行，返回写入的行数
    async fn copy_rows(&self, load: BulkLoad) -> Result<u64>;

    /// 检查客户端是否健康
    async fn is_healthy(&self) -> bool {
        true
    }
}
