//! 行写入
//!
//! 根据 [`ColumnOptions`] 把一批 [`LogEvent`] 转换为带类型的行：先是按存储顺序
//! 排列的标准列，然后是按配置顺序排列的附加列。

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::columns::{ColumnOptions, ColumnType, DataColumnMapping, StandardColumn};
use crate::core::event::{LogEvent, PropertyValue};
use crate::core::template::FormatProvider;
use crate::error::{PgSinkError, Result};
use crate::formatting::{EventJsonFormatter, JsonValueFormatter};

/// 单个单元格的值
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    /// 带列类型的空值
    Null(ColumnType),
    Text(String),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Real(f32),
    Double(f64),
    Boolean(bool),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
    Date(NaiveDate),
    /// JSON 文本，写入 json 或 jsonb 列
    Json(String),
}

impl ColumnValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) | Self::Json(text) => Some(text),
            _ => None,
        }
    }
}

/// 目标列
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }

    pub fn quoted_name(&self) -> String {
        quote_identifier(&self.name)
    }
}

/// `"schema"."table"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedTableName {
    pub schema: String,
    pub table: String,
}

impl QualifiedTableName {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    pub fn quoted(&self) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.schema),
            quote_identifier(&self.table)
        )
    }
}

impl fmt::Display for QualifiedTableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// 一次批量操作：目标表、列清单和按提交顺序排列的行
#[derive(Debug, Clone, PartialEq)]
pub struct BulkLoad {
    pub table: QualifiedTableName,
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Vec<ColumnValue>>,
}

impl BulkLoad {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// 把事件映射为行
#[derive(Debug, Clone)]
pub struct RowWriter {
    options: Arc<ColumnOptions>,
    format_provider: Arc<dyn FormatProvider>,
    table: QualifiedTableName,
    columns: Vec<ColumnDescriptor>,
}

impl RowWriter {
    pub fn new(
        options: Arc<ColumnOptions>,
        format_provider: Arc<dyn FormatProvider>,
        table: QualifiedTableName,
    ) -> Self {
        let columns = options
            .store()
            .iter()
            .map(|column| {
                ColumnDescriptor::new(options.column_name(*column), options.column_type(*column))
            })
            .chain(options.additional_columns().iter().map(|mapping| {
                ColumnDescriptor::new(mapping.column_name(), mapping.data_type())
            }))
            .collect();

        Self {
            options,
            format_provider,
            table,
            columns,
        }
    }

    pub fn table(&self) -> &QualifiedTableName {
        &self.table
    }

    /// 有序列清单
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    /// 准备一次批量操作，任何一行失败则整批失败
    pub fn prepare(&self, events: &[LogEvent]) -> Result<BulkLoad> {
        let rows = events
            .iter()
            .map(|event| self.write_row(event))
            .collect::<Result<Vec<_>>>()?;
        Ok(BulkLoad {
            table: self.table.clone(),
            columns: self.columns.clone(),
            rows,
        })
    }

    /// 计算单个事件的行，顺序与 [`columns`](Self::columns) 一致
    pub fn write_row(&self, event: &LogEvent) -> Result<Vec<ColumnValue>> {
        let mut row = Vec::with_capacity(self.columns.len());
        for column in self.options.store() {
            row.push(self.standard_value(*column, event)?);
        }
        for mapping in self.options.additional_columns() {
            row.push(additional_value(mapping, event)?);
        }
        Ok(row)
    }

    fn standard_value(&self, column: StandardColumn, event: &LogEvent) -> Result<ColumnValue> {
        let value = match column {
            StandardColumn::Message => {
                let rendered = event.render_message(self.format_provider.as_ref());
                if rendered.is_empty() {
                    ColumnValue::Null(ColumnType::Text)
                } else {
                    ColumnValue::Text(rendered)
                }
            }
            StandardColumn::MessageTemplate => {
                ColumnValue::Text(event.template().text().to_string())
            }
            StandardColumn::Level if self.options.level_store_as_smallint() => {
                ColumnValue::SmallInt(event.level().ordinal())
            }
            StandardColumn::Level => ColumnValue::Text(event.level().name().to_string()),
            StandardColumn::TimeStamp if self.options.timestamp_convert_to_utc() => {
                ColumnValue::TimestampTz(event.timestamp().with_timezone(&Utc).fixed_offset())
            }
            StandardColumn::TimeStamp => ColumnValue::TimestampTz(event.timestamp()),
            StandardColumn::Exception => match event.exception() {
                Some(exception) => ColumnValue::Text(exception.to_string()),
                None => ColumnValue::Null(ColumnType::Text),
            },
            StandardColumn::Properties => {
                let json = if self.options.properties_exclude_additional() {
                    let kept: BTreeMap<String, PropertyValue> = event
                        .properties()
                        .iter()
                        .filter(|(name, _)| !self.options.is_redirected(name))
                        .map(|(name, value)| (name.clone(), value.clone()))
                        .collect();
                    EventJsonFormatter.format_properties(&kept)?
                } else {
                    EventJsonFormatter.format_properties(event.properties())?
                };
                ColumnValue::Json(json)
            }
            StandardColumn::LogEvent => {
                let json = if self.options.log_event_exclude_additional() {
                    let reduced = event.without_properties(|name| self.options.is_redirected(name));
                    EventJsonFormatter.format_event_with(&reduced, self.format_provider.as_ref())?
                } else {
                    EventJsonFormatter.format_event_with(event, self.format_provider.as_ref())?
                };
                ColumnValue::Json(json)
            }
        };
        Ok(value)
    }
}

fn additional_value(mapping: &DataColumnMapping, event: &LogEvent) -> Result<ColumnValue> {
    let target = mapping.data_type();
    let scalar = match event.property(mapping.property_name()) {
        Some(PropertyValue::Scalar(scalar)) if !scalar.is_null() => scalar,
        _ => return Ok(ColumnValue::Null(target)),
    };

    if target.is_json() {
        let json = JsonValueFormatter.to_json(&PropertyValue::Scalar(scalar.clone()))?;
        return Ok(ColumnValue::Json(json));
    }

    let text = scalar.to_plain_string().unwrap_or_default();
    coerce(&text, target).ok_or_else(|| {
        PgSinkError::coercion(mapping.column_name(), text.as_str(), target.sql_name())
    })
}

/// 把标量的字符串形式转换为列类型
fn coerce(text: &str, target: ColumnType) -> Option<ColumnValue> {
    let trimmed = text.trim();
    let value = match target {
        ColumnType::Text | ColumnType::Varchar => ColumnValue::Text(text.to_string()),
        ColumnType::SmallInt => ColumnValue::SmallInt(trimmed.parse().ok()?),
        ColumnType::Integer => ColumnValue::Integer(trimmed.parse().ok()?),
        ColumnType::BigInt => ColumnValue::BigInt(trimmed.parse().ok()?),
        ColumnType::Real => ColumnValue::Real(trimmed.parse().ok()?),
        ColumnType::Double => ColumnValue::Double(trimmed.parse().ok()?),
        ColumnType::Boolean => ColumnValue::Boolean(parse_bool(trimmed)?),
        ColumnType::Timestamp => ColumnValue::Timestamp(parse_naive_datetime(trimmed)?),
        ColumnType::TimestampTz => ColumnValue::TimestampTz(parse_datetime(trimmed)?),
        ColumnType::Date => ColumnValue::Date(parse_date(trimmed)?),
        ColumnType::Json | ColumnType::Jsonb => ColumnValue::Json(text.to_string()),
    };
    Some(value)
}

fn parse_bool(text: &str) -> Option<bool> {
    if text.eq_ignore_ascii_case("true") {
        Some(true)
    } else if text.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

fn parse_naive_datetime(text: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local());
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
}

/// 没有偏移量的文本按 UTC 解释
fn parse_datetime(text: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .or_else(|| DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f %z").ok())
        .or_else(|| {
            NAIVE_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
                .map(|naive| naive.and_utc().fixed_offset())
        })
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_naive_datetime(text).map(|dt| dt.date()))
}
