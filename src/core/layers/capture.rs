//! tracing 事件捕获层
//!
//! 把 `tracing` 事件转换为 [`LogEvent`] 并提交给 [`PostgreSqlSink`]：
//!
//! - `message` 字段作为消息模板
//! - `error` / `exception` 字段作为异常文本
//! - 其他字段作为标量属性
//! - 事件的 target 记录在 `SourceContext` 属性中
//!
//! 本 crate 自身 target 下的事件会被忽略，避免 sink 的内部日志再次进入 sink。
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use quantum_pg_sink::{PostgreSqlLayer, PostgreSqlSink};
//! use tracing_subscriber::prelude::*;
//!
//! # fn install(sink: Arc<PostgreSqlSink>) {
//! tracing_subscriber::registry()
//!     .with(PostgreSqlLayer::new(sink))
//!     .init();
//! # }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::core::event::{describe_error, LogEvent, LogEventLevel, PropertyValue};
use crate::core::template::MessageTemplate;
use crate::sinks::database::PostgreSqlSink;

const OWN_TARGET: &str = "quantum_pg_sink";
const SOURCE_CONTEXT: &str = "SourceContext";

/// 把 tracing 事件写入 PostgreSQL 的处理层
#[derive(Debug, Clone)]
pub struct PostgreSqlLayer {
    sink: Arc<PostgreSqlSink>,
    include_source_context: bool,
}

impl PostgreSqlLayer {
    pub fn new(sink: Arc<PostgreSqlSink>) -> Self {
        Self {
            sink,
            include_source_context: true,
        }
    }

    /// 是否把 target 写入 `SourceContext` 属性
    pub fn with_source_context(mut self, enabled: bool) -> Self {
        self.include_source_context = enabled;
        self
    }

    pub fn sink(&self) -> &Arc<PostgreSqlSink> {
        &self.sink
    }

    fn convert(&self, event: &Event<'_>) -> LogEvent {
        let metadata = event.metadata();
        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let mut log_event = LogEvent::new(LogEventLevel::from(metadata.level()), "")
            .with_template(MessageTemplate::parse(&visitor.message));
        for (name, value) in visitor.properties {
            log_event.add_property(name, value);
        }
        if self.include_source_context {
            log_event.add_property(SOURCE_CONTEXT, metadata.target());
        }
        log_event.set_exception(visitor.exception);
        log_event
    }
}

impl<S> Layer<S> for PostgreSqlLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if event.metadata().target().starts_with(OWN_TARGET) {
            return;
        }
        self.sink.submit(self.convert(event));
    }
}

#[derive(Default)]
struct EventVisitor {
    message: String,
    exception: Option<String>,
    properties: BTreeMap<String, PropertyValue>,
}

impl EventVisitor {
    fn is_exception_field(field: &Field) -> bool {
        matches!(field.name(), "error" | "exception")
    }

    fn insert(&mut self, field: &Field, value: PropertyValue) {
        self.properties.insert(field.name().to_string(), value);
    }
}

impl Visit for EventVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let text = format!("{:?}", value);
        match field.name() {
            "message" => self.message = text,
            _ if Self::is_exception_field(field) => self.exception = Some(text),
            _ => self.insert(field, text.into()),
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            _ if Self::is_exception_field(field) => self.exception = Some(value.to_string()),
            _ => self.insert(field, value.into()),
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        if Self::is_exception_field(field) || self.exception.is_none() {
            self.exception = Some(describe_error(value));
        } else {
            self.insert(field, value.to_string().into());
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::sinks::database::{BulkLoad, ColumnValue};
    use crate::sinks::traits::BulkCopyClient;
    use crate::{ColumnOptions, StandardColumn};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tracing_subscriber::prelude::*;

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

    #[derive(Debug, thiserror::Error)]
    #[error("disk full")]
    struct DiskFull;

    #[tokio::test]
    async fn test_tracing_events_are_captured() {
        let client = Arc::new(MemoryClient::default());
        let sink = Arc::new(
            PostgreSqlSink::builder("postgres://localhost/app", "layer_logs")
                .period(Duration::from_secs(3600))
                .column_options(
                    ColumnOptions::builder()
                        .store([
                            StandardColumn::Message,
                            StandardColumn::Level,
                            StandardColumn::Exception,
                            StandardColumn::Properties,
                        ])
                        .build()
                        .unwrap(),
                )
                .build_with_client(client.clone())
                .unwrap(),
        );

        let subscriber = tracing_subscriber::registry().with(PostgreSqlLayer::new(sink.clone()));
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(
                target: "app::orders",
                order_id = 7u64,
                paid = true,
                "order {{order_id}} stalled"
            );
            tracing::error!(
                target: "app::disk",
                error = &DiskFull as &(dyn std::error::Error + 'static),
                "write failed"
            );
            tracing::info!(target: "quantum_pg_sink::internal", "ignored");
        });

        sink.shutdown().await.unwrap();

        let loads = client.loads.lock().unwrap();
        let rows: Vec<_> = loads.iter().flat_map(|load| load.rows.clone()).collect();
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0][0], ColumnValue::Text("order 7 stalled".to_string()));
        assert_eq!(rows[0][1], ColumnValue::Text("Warning".to_string()));
        assert_eq!(
            rows[0][3],
            ColumnValue::Json(
                r#"{"SourceContext":"app::orders","order_id":7,"paid":true}"#.to_string()
            )
        );

        assert_eq!(rows[1][1], ColumnValue::Text("Error".to_string()));
        assert_eq!(rows[1][2], ColumnValue::Text("disk full".to_string()));
    }
}
