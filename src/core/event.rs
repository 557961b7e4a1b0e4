//! 日志事件定义
//!
//! 此模块定义了 sink 消费的结构化日志事件：时间戳、级别、消息模板、
//! 属性包以及可选的异常文本。

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::core::template::{FormatProvider, MessageTemplate};
use crate::error::PgSinkError;

/// 日志级别，按严重程度递增排序
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum LogEventLevel {
    Verbose,
    Debug,
    #[default]
    Information,
    Warning,
    Error,
    Fatal,
}

impl LogEventLevel {
    /// 级别名称，用于 JSON 与文本列
    pub fn name(self) -> &'static str {
        match self {
            Self::Verbose => "Verbose",
            Self::Debug => "Debug",
            Self::Information => "Information",
            Self::Warning => "Warning",
            Self::Error => "Error",
            Self::Fatal => "Fatal",
        }
    }

    /// 级别序号，用于 smallint 列
    pub fn ordinal(self) -> i16 {
        self as i16
    }
}

impl fmt::Display for LogEventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LogEventLevel {
    type Err = PgSinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "verbose" | "trace" => Ok(Self::Verbose),
            "debug" => Ok(Self::Debug),
            "information" | "info" => Ok(Self::Information),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "fatal" => Ok(Self::Fatal),
            _ => Err(PgSinkError::config(format!("Unknown log level: {}", s))),
        }
    }
}

impl From<&tracing::Level> for LogEventLevel {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => Self::Verbose,
            tracing::Level::DEBUG => Self::Debug,
            tracing::Level::INFO => Self::Information,
            tracing::Level::WARN => Self::Warning,
            tracing::Level::ERROR => Self::Error,
        }
    }
}

/// 标量属性值
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    Char(char),
    String(String),
    DateTime(DateTime<FixedOffset>),
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The value's plain string form, `None` for null.
    ///
    /// Strings are returned as-is, without the quoting applied when a message
    /// is rendered.
    pub fn to_plain_string(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::String(s) => Some(s.clone()),
            other => Some(crate::core::template::format_invariant(other, None)),
        }
    }
}

macro_rules! scalar_from {
    ($($ty:ty => $variant:ident as $target:ty),* $(,)?) => {
        $(
            impl From<$ty> for ScalarValue {
                fn from(value: $ty) -> Self {
                    Self::$variant(value as $target)
                }
            }

            impl From<$ty> for PropertyValue {
                fn from(value: $ty) -> Self {
                    Self::Scalar(ScalarValue::from(value))
                }
            }
        )*
    };
}

scalar_from! {
    i8 => I64 as i64,
    i16 => I64 as i64,
    i32 => I64 as i64,
    i64 => I64 as i64,
    u8 => U64 as u64,
    u16 => U64 as u64,
    u32 => U64 as u64,
    u64 => U64 as u64,
    usize => U64 as u64,
    f32 => F64 as f64,
    f64 => F64 as f64,
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<char> for ScalarValue {
    fn from(value: char) -> Self {
        Self::Char(value)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<DateTime<FixedOffset>> for ScalarValue {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Self::DateTime(value)
    }
}

impl From<DateTime<Utc>> for ScalarValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::DateTime(value.fixed_offset())
    }
}

/// 结构化值：可选类型标签 + 有序字段列表
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructureValue {
    pub type_tag: Option<String>,
    pub fields: Vec<(String, PropertyValue)>,
}

impl StructureValue {
    pub fn new(type_tag: Option<&str>) -> Self {
        Self {
            type_tag: type_tag.map(str::to_string),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }
}

/// 属性值的标签联合
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Scalar(ScalarValue),
    Sequence(Vec<PropertyValue>),
    Structure(StructureValue),
    /// Keys keep their insertion order; duplicate keys are allowed.
    Dictionary(Vec<(ScalarValue, PropertyValue)>),
}

impl PropertyValue {
    pub fn null() -> Self {
        Self::Scalar(ScalarValue::Null)
    }

    pub fn as_scalar(&self) -> Option<&ScalarValue> {
        match self {
            Self::Scalar(scalar) => Some(scalar),
            _ => None,
        }
    }
}

impl From<ScalarValue> for PropertyValue {
    fn from(value: ScalarValue) -> Self {
        Self::Scalar(value)
    }
}

impl From<StructureValue> for PropertyValue {
    fn from(value: StructureValue) -> Self {
        Self::Structure(value)
    }
}

impl From<Vec<PropertyValue>> for PropertyValue {
    fn from(value: Vec<PropertyValue>) -> Self {
        Self::Sequence(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Scalar(value.into())
    }
}

impl From<char> for PropertyValue {
    fn from(value: char) -> Self {
        Self::Scalar(value.into())
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Scalar(value.into())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Scalar(value.into())
    }
}

impl From<DateTime<FixedOffset>> for PropertyValue {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Self::Scalar(value.into())
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Scalar(value.into())
    }
}

/// 结构化日志事件
///
/// 事件一旦交给 sink 即视为只读；属性名在单个事件内唯一。
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    timestamp: DateTime<FixedOffset>,
    level: LogEventLevel,
    template: MessageTemplate,
    properties: BTreeMap<String, PropertyValue>,
    exception: Option<String>,
}

impl LogEvent {
    /// 创建新的日志事件，时间戳为当前 UTC 时间
    pub fn new(level: LogEventLevel, template: &str) -> Self {
        Self {
            timestamp: Utc::now().fixed_offset(),
            level,
            template: MessageTemplate::parse(template),
            properties: BTreeMap::new(),
            exception: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<FixedOffset>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_template(mut self, template: MessageTemplate) -> Self {
        self.template = template;
        self
    }

    /// 添加属性，同名属性会被覆盖
    pub fn with_property(
        mut self,
        name: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn with_exception(mut self, exception: impl Into<String>) -> Self {
        self.exception = Some(exception.into());
        self
    }

    /// 以错误链作为异常文本，每个 `source()` 单独一行
    pub fn with_error(mut self, error: &(dyn std::error::Error + 'static)) -> Self {
        self.exception = Some(describe_error(error));
        self
    }

    pub fn add_property(&mut self, name: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.insert(name.into(), value.into());
    }

    pub fn set_exception(&mut self, exception: Option<String>) {
        self.exception = exception;
    }

    pub fn timestamp(&self) -> DateTime<FixedOffset> {
        self.timestamp
    }

    pub fn level(&self) -> LogEventLevel {
        self.level
    }

    pub fn template(&self) -> &MessageTemplate {
        &self.template
    }

    pub fn properties(&self) -> &BTreeMap<String, PropertyValue> {
        &self.properties
    }

    pub fn exception(&self) -> Option<&str> {
        self.exception.as_deref()
    }

    /// 查找属性：先精确匹配，再忽略大小写匹配
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name).or_else(|| {
            let folded = name.to_lowercase();
            self.properties
                .iter()
                .find(|(key, _)| key.to_lowercase() == folded)
                .map(|(_, value)| value)
        })
    }

    /// 使用给定的格式提供者渲染消息
    pub fn render_message(&self, provider: &dyn FormatProvider) -> String {
        self.template.render(&self.properties, provider)
    }

    /// 复制事件，但去掉 `exclude` 返回 true 的属性
    pub fn without_properties<F>(&self, mut exclude: F) -> Self
    where
        F: FnMut(&str) -> bool,
    {
        Self {
            properties: self
                .properties
                .iter()
                .filter(|(name, _)| !exclude(name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            ..self.clone()
        }
    }
}

pub(crate) fn describe_error(error: &(dyn std::error::Error + 'static)) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        text.push_str("\n ---> ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("connection reset")]
    struct Inner;

    #[derive(Debug, thiserror::Error)]
    #[error("request failed")]
    struct Outer(#[source] Inner);

    #[test]
    fn test_level_ordering_and_names() {
        assert!(LogEventLevel::Verbose < LogEventLevel::Debug);
        assert!(LogEventLevel::Error < LogEventLevel::Fatal);
        assert_eq!(LogEventLevel::Warning.name(), "Warning");
        assert_eq!(LogEventLevel::Verbose.ordinal(), 0);
        assert_eq!(LogEventLevel::Fatal.ordinal(), 5);
        assert_eq!(LogEventLevel::default(), LogEventLevel::Information);
    }

    #[test]
    fn test_level_from_str() {
        assert_eq!("warn".parse::<LogEventLevel>().unwrap(), LogEventLevel::Warning);
        assert_eq!("Information".parse::<LogEventLevel>().unwrap(), LogEventLevel::Information);
        assert!("loud".parse::<LogEventLevel>().is_err());
    }

    #[test]
    fn test_level_from_tracing() {
        assert_eq!(LogEventLevel::from(&tracing::Level::TRACE), LogEventLevel::Verbose);
        assert_eq!(LogEventLevel::from(&tracing::Level::WARN), LogEventLevel::Warning);
    }

    #[test]
    fn test_property_lookup_ignores_case() {
        let event = LogEvent::new(LogEventLevel::Information, "hello")
            .with_property("UserId", 42);

        assert_eq!(event.property("UserId"), Some(&PropertyValue::from(42)));
        assert_eq!(event.property("userid"), Some(&PropertyValue::from(42)));
        assert!(event.property("missing").is_none());
    }

    #[test]
    fn test_property_lookup_folds_non_ascii_case() {
        let event = LogEvent::new(LogEventLevel::Information, "hello")
            .with_property("Ärger", "value");

        assert_eq!(event.property("ärger"), Some(&PropertyValue::from("value")));
        assert_eq!(event.property("ÄRGER"), Some(&PropertyValue::from("value")));
    }

    #[test]
    fn test_without_properties_keeps_rest() {
        let event = LogEvent::new(LogEventLevel::Error, "{A} {B}")
            .with_property("A", 1)
            .with_property("B", "x")
            .with_exception("boom");

        let trimmed = event.without_properties(|name| name.eq_ignore_ascii_case("a"));
        assert_eq!(trimmed.properties().len(), 1);
        assert!(trimmed.properties().contains_key("B"));
        assert_eq!(trimmed.exception(), Some("boom"));
        assert_eq!(trimmed.level(), LogEventLevel::Error);
        assert_eq!(event.properties().len(), 2);
    }

    #[test]
    fn test_error_chain_becomes_exception_text() {
        let error = Outer(Inner);
        let event = LogEvent::new(LogEventLevel::Error, "failed").with_error(&error);
        assert_eq!(event.exception(), Some("request failed\n ---> connection reset"));
    }

    #[test]
    fn test_scalar_plain_string() {
        assert_eq!(ScalarValue::from("abc").to_plain_string(), Some("abc".to_string()));
        assert_eq!(ScalarValue::from(12).to_plain_string(), Some("12".to_string()));
        assert_eq!(ScalarValue::Null.to_plain_string(), None);
        assert_eq!(ScalarValue::from(true).to_plain_string(), Some("true".to_string()));
    }
}
