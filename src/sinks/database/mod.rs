//! PostgreSQL Sink 模块
//!
//! - [`rows`]：把事件转换为按列排列的行
//! - [`copy`]：以事务批量写入行
//! - [`sink`]：把批处理引擎和写入组合成 [`PostgreSqlSink`]

pub mod copy;
pub mod rows;
pub mod sink;

pub use rows::{BulkLoad, ColumnDescriptor, ColumnValue, QualifiedTableName, RowWriter};
pub use sink::{PostgreSqlSink, PostgreSqlSinkBuilder};

#[cfg(feature = "postgres")]
pub use copy::PostgresCopyClient;
