//! Sinks 模块
//!
//! 批处理引擎、sink 接口以及 PostgreSQL 写入实现。

pub mod batching;
pub mod database;
pub mod traits;

// 重新导出主要类型
pub use batching::{BatchingEngine, BatchingOptions, EngineState};
pub use database::{PostgreSqlSink, PostgreSqlSinkBuilder};
pub use traits::{BatchedSink, BulkCopyClient};
