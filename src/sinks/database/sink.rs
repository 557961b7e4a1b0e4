//!
//! PostgreSQL Sink 实现
//!
//! 把事件交给批处理引擎缓冲，每次刷新时由 [`RowWriter`] 生成行，再通过
//! [`BulkCopyClient`] 以单次批量操作写入 `"<schema>"."<table>"`。

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::columns::ColumnOptions;
use crate::config::PostgreSqlSinkConfig;
use crate::core::event::LogEvent;
use crate::core::template::{FormatProvider, InvariantFormatProvider};
use crate::diagnostics::{Diagnostics, DiagnosticsSnapshot};
use crate::error::{PgSinkError, Result};
use crate::sinks::batching::{BatchingEngine, BatchingOptions, EngineState};
use crate::sinks::database::rows::{ColumnDescriptor, QualifiedTableName, RowWriter};
use crate::sinks::traits::{BatchedSink, BulkCopyClient};

/// 刷新时执行的写入逻辑
#[derive(Debug)]
struct DatabaseWriter {
    name: String,
    rows: RowWriter,
    client: Arc<dyn BulkCopyClient>,
    diagnostics: Arc<Diagnostics>,
}

#[async_trait]
impl BatchedSink for DatabaseWriter {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn emit_batch(&self, events: Vec<LogEvent>) -> Result<()> {
        let load = self.rows.prepare(&events)?;
        if load.rows.is_empty() {
            return Ok(());
        }

        let expected = load.row_count() as u64;
        let written = self.client.copy_rows(load).await?;
        self.diagnostics.increment_bulk_operations();

        if written != expected {
            warn!(
                target: "quantum_pg_sink::sink",
                sink = %self.name,
                expected,
                written,
                "写入行数与批次大小不一致"
            );
        } else {
            debug!(target: "quantum_pg_sink::sink", sink = %self.name, written, "批次已提交");
        }
        Ok(())
    }
}

/// 批量写入 PostgreSQL 的日志 sink
///
/// `submit` 从不失败也不阻塞；写入错误只会出现在 self-log 中。
#[derive(Debug)]
pub struct PostgreSqlSink {
    engine: BatchingEngine,
    writer: Arc<DatabaseWriter>,
    column_options: Arc<ColumnOptions>,
}

impl PostgreSqlSink {
    pub fn builder(
        connection_string: impl Into<String>,
        table_name: impl Into<String>,
    ) -> PostgreSqlSinkBuilder {
        PostgreSqlSinkBuilder::new(connection_string, table_name)
    }

    /// 按配置创建 sink 并连接 PostgreSQL
    #[cfg(feature = "postgres")]
    pub fn from_config(config: &PostgreSqlSinkConfig) -> Result<Self> {
        config.validate()?;
        PostgreSqlSinkBuilder::from_config(config)?.build()
    }

    /// 按配置创建 sink，写入交给给定的客户端
    pub fn from_config_with_client(
        config: &PostgreSqlSinkConfig,
        client: Arc<dyn BulkCopyClient>,
    ) -> Result<Self> {
        config.validate()?;
        PostgreSqlSinkBuilder::from_config(config)?.build_with_client(client)
    }

    /// 缓冲一个事件
    pub fn submit(&self, event: LogEvent) {
        self.engine.submit(event);
    }

    /// 写出剩余事件并停止，等待时间为配置的停机超时
    pub async fn shutdown(&self) -> Result<()> {
        let timeout = self.engine.options().shutdown_timeout;
        self.engine.shutdown(timeout).await
    }

    /// 写出剩余事件并停止，最多等待 `timeout`
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<()> {
        self.engine.shutdown(timeout).await
    }

    /// self-log 中使用的组件名：`PostgreSqlSink(<schema>.<table>)`
    pub fn name(&self) -> &str {
        self.engine.name()
    }

    pub fn state(&self) -> EngineState {
        self.engine.state()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.engine.diagnostics().snapshot()
    }

    pub fn column_options(&self) -> &ColumnOptions {
        &self.column_options
    }

    /// 批量操作使用的有序列清单
    pub fn columns(&self) -> &[ColumnDescriptor] {
        self.writer.rows.columns()
    }

    pub fn batching_options(&self) -> &BatchingOptions {
        self.engine.options()
    }

    pub async fn is_healthy(&self) -> bool {
        self.engine.state() != EngineState::Stopped && self.writer.client.is_healthy().await
    }
}

/// [`PostgreSqlSink`] 构建器
#[derive(Debug, Clone)]
pub struct PostgreSqlSinkBuilder {
    connection_string: String,
    schema_name: String,
    table_name: String,
    batching: BatchingOptions,
    format_provider: Arc<dyn FormatProvider>,
    column_options: ColumnOptions,
    connection_pool_size: u32,
    connection_timeout: Duration,
}

impl PostgreSqlSinkBuilder {
    pub fn new(connection_string: impl Into<String>, table_name: impl Into<String>) -> Self {
        let defaults = PostgreSqlSinkConfig::new("", "");
        Self {
            connection_string: connection_string.into(),
            schema_name: defaults.schema_name.clone(),
            table_name: table_name.into(),
            batching: defaults.batching_options(),
            format_provider: Arc::new(InvariantFormatProvider),
            column_options: ColumnOptions::default(),
            connection_pool_size: defaults.connection_pool_size,
            connection_timeout: defaults.connection_timeout(),
        }
    }

    pub fn from_config(config: &PostgreSqlSinkConfig) -> Result<Self> {
        Ok(Self {
            connection_string: config.connection_string.clone(),
            schema_name: config.schema_name.clone(),
            table_name: config.table_name.clone(),
            batching: config.batching_options(),
            format_provider: Arc::new(InvariantFormatProvider),
            column_options: config.column_options()?,
            connection_pool_size: config.connection_pool_size,
            connection_timeout: config.connection_timeout(),
        })
    }

    pub fn schema_name(mut self, schema_name: impl Into<String>) -> Self {
        self.schema_name = schema_name.into();
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batching.batch_size = batch_size;
        self
    }

    pub fn period(mut self, period: Duration) -> Self {
        self.batching.period = period;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.batching.shutdown_timeout = timeout;
        self
    }

    pub fn format_provider(mut self, provider: Arc<dyn FormatProvider>) -> Self {
        self.format_provider = provider;
        self
    }

    pub fn column_options(mut self, options: ColumnOptions) -> Self {
        self.column_options = options;
        self
    }

    pub fn connection_pool_size(mut self, size: u32) -> Self {
        self.connection_pool_size = size;
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// 创建连接池并启动引擎，需要在 Tokio 运行时中调用
    #[cfg(feature = "postgres")]
    pub fn build(self) -> Result<PostgreSqlSink> {
        use crate::sinks::database::copy::PostgresCopyClient;

        if self.connection_pool_size == 0 {
            return Err(PgSinkError::config("connection_pool_size must be greater than 0"));
        }
        let client = PostgresCopyClient::new(
            &self.connection_string,
            self.connection_pool_size,
            self.connection_timeout,
        )?;
        self.build_with_client(Arc::new(client))
    }

    /// 使用给定的客户端启动引擎，需要在 Tokio 运行时中调用
    pub fn build_with_client(self, client: Arc<dyn BulkCopyClient>) -> Result<PostgreSqlSink> {
        if self.schema_name.trim().is_empty() {
            return Err(PgSinkError::config("Schema name cannot be blank"));
        }
        if self.table_name.trim().is_empty() {
            return Err(PgSinkError::config("Table name cannot be blank"));
        }
        self.batching.validate()?;

        let table = QualifiedTableName::new(self.schema_name, self.table_name);
        let name = format!("PostgreSqlSink({})", table);
        let column_options = Arc::new(self.column_options);
        let diagnostics = Arc::new(Diagnostics::new());

        let writer = Arc::new(DatabaseWriter {
            name,
            rows: RowWriter::new(column_options.clone(), self.format_provider, table),
            client,
            diagnostics: diagnostics.clone(),
        });
        let engine = BatchingEngine::start(writer.clone(), self.batching, diagnostics)?;

        Ok(PostgreSqlSink {
            engine,
            writer,
            column_options,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::StandardColumn;
    use crate::core::event::LogEventLevel;
    use crate::sinks::database::rows::{BulkLoad, ColumnValue};
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct MemoryClient {
        loads: Mutex<Vec<BulkLoad>>,
    }

    #[async_trait]
    impl BulkCopyClient for MemoryClient {
        async fn copy_rows(&self, load: BulkLoad) -> Result<u64> {
            let count = load.row_count() as u64;
            self.loads.lock().unwrap().push(load);
            Ok(count)
        }
    }

    #[test]
    fn test_builder_rejects_blank_names() {
        let client: Arc<dyn BulkCopyClient> = Arc::new(MemoryClient::default());
        let err = PostgreSqlSink::builder("postgres://localhost/app", " ")
            .build_with_client(client.clone())
            .unwrap_err();
        assert!(matches!(err, PgSinkError::ConfigError(_)));

        let err = PostgreSqlSink::builder("postgres://localhost/app", "logs")
            .schema_name("")
            .build_with_client(client)
            .unwrap_err();
        assert!(matches!(err, PgSinkError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_shutdown_writes_buffered_rows() {
        let client = Arc::new(MemoryClient::default());
        let sink = PostgreSqlSink::builder("postgres://localhost/app", "app_logs")
            .schema_name("audit")
            .batch_size(10)
            .period(Duration::from_secs(3600))
            .column_options(
                ColumnOptions::builder()
                    .store([StandardColumn::Message, StandardColumn::Level])
                    .level_as_smallint(true)
                    .build()
                    .unwrap(),
            )
            .build_with_client(client.clone())
            .unwrap();

        assert_eq!(sink.name(), "PostgreSqlSink(audit.app_logs)");
        let names: Vec<_> = sink.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["message", "level"]);

        sink.submit(LogEvent::new(LogEventLevel::Error, "first"));
        sink.submit(LogEvent::new(LogEventLevel::Debug, "second"));
        sink.shutdown().await.unwrap();

        let loads = client.loads.lock().unwrap();
        assert_eq!(loads.len(), 1);
        assert_eq!(loads[0].table.quoted(), r#""audit"."app_logs""#);
        assert_eq!(
            loads[0].rows,
            vec![
                vec![ColumnValue::Text("first".into()), ColumnValue::SmallInt(4)],
                vec![ColumnValue::Text("second".into()), ColumnValue::SmallInt(1)],
            ]
        );

        let snapshot = sink.diagnostics();
        assert_eq!(snapshot.events_written, 2);
        assert_eq!(snapshot.bulk_operations, 1);
        assert_eq!(sink.state(), EngineState::Stopped);
    }

    #[tokio::test]
    async fn test_from_config_with_client() {
        let mut config = PostgreSqlSinkConfig::new("postgres://localhost/app", "logs");
        config.batch_size = 1;
        let client = Arc::new(MemoryClient::default());
        let sink = PostgreSqlSink::from_config_with_client(&config, client.clone()).unwrap();

        assert_eq!(sink.batching_options().batch_size, 1);
        assert_eq!(sink.columns().len(), StandardColumn::ALL.len());
        assert!(sink.is_healthy().await);

        sink.submit(LogEvent::new(LogEventLevel::Information, "hello"));
        sink.shutdown().await.unwrap();
        assert_eq!(client.loads.lock().unwrap().len(), 1);
        assert!(!sink.is_healthy().await);
    }

    #[test]
    fn test_from_config_with_client_rejects_invalid_config() {
        let client = Arc::new(MemoryClient::default());

        let blank = PostgreSqlSinkConfig::new("  ", "logs");
        let err = PostgreSqlSink::from_config_with_client(&blank, client.clone()).unwrap_err();
        assert!(matches!(err, PgSinkError::ConfigError(_)));

        let mut no_pool = PostgreSqlSinkConfig::new("postgres://localhost/app", "logs");
        no_pool.connection_pool_size = 0;
        let err = PostgreSqlSink::from_config_with_client(&no_pool, client.clone()).unwrap_err();
        assert!(matches!(err, PgSinkError::ConfigError(_)));
        assert!(client.loads.lock().unwrap().is_empty());
    }
}
