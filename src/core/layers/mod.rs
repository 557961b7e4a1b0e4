//! tracing 处理层

pub mod capture;

pub use capture::PostgreSqlLayer;
