//! 核心模块
//!
//! 日志事件模型、消息模板以及 tracing 捕获层。

pub mod event;
pub mod layers;
pub mod template;

// 重新导出核心类型
pub use event::{LogEvent, LogEventLevel, PropertyValue, ScalarValue, StructureValue};
pub use template::{FormatProvider, InvariantFormatProvider, MessageTemplate};

pub use layers::PostgreSqlLayer;
