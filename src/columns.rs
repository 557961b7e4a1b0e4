//! 列映射模型
//!
//! 描述目标表中启用哪些标准列、它们的列名与类型，以及把事件属性映射到
//! 附加列的配置。所有校验都在构建时完成，构建成功的 [`ColumnOptions`]
//! 在运行期间不可变。

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::{PgSinkError, Result};

/// 内置的标准列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StandardColumn {
    Message,
    MessageTemplate,
    Level,
    #[serde(rename = "timestamp", alias = "time_stamp")]
    TimeStamp,
    Exception,
    Properties,
    LogEvent,
}

impl StandardColumn {
    /// 所有标准列，按默认存储顺序
    pub const ALL: [StandardColumn; 7] = [
        StandardColumn::Message,
        StandardColumn::MessageTemplate,
        StandardColumn::Level,
        StandardColumn::TimeStamp,
        StandardColumn::Exception,
        StandardColumn::Properties,
        StandardColumn::LogEvent,
    ];

    /// 内置列名
    pub fn default_name(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::MessageTemplate => "message_template",
            Self::Level => "level",
            Self::TimeStamp => "timestamp",
            Self::Exception => "exception",
            Self::Properties => "properties",
            Self::LogEvent => "log_event",
        }
    }
}

/// 目标列的 PostgreSQL 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Varchar,
    #[serde(alias = "int2")]
    SmallInt,
    #[serde(alias = "int", alias = "int4")]
    Integer,
    #[serde(alias = "int8")]
    BigInt,
    #[serde(alias = "float4")]
    Real,
    #[serde(alias = "float8", alias = "double_precision")]
    Double,
    #[serde(alias = "bool")]
    Boolean,
    Timestamp,
    #[serde(alias = "timestamp_tz")]
    TimestampTz,
    Date,
    Json,
    Jsonb,
}

impl ColumnType {
    /// SQL 类型名
    pub fn sql_name(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Varchar => "varchar",
            Self::SmallInt => "smallint",
            Self::Integer => "integer",
            Self::BigInt => "bigint",
            Self::Real => "real",
            Self::Double => "double precision",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
            Self::TimestampTz => "timestamp with time zone",
            Self::Date => "date",
            Self::Json => "json",
            Self::Jsonb => "jsonb",
        }
    }

    pub fn is_json(self) -> bool {
        matches!(self, Self::Json | Self::Jsonb)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

/// 附加列配置：把一个事件属性写入一个独立的列
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdditionalDataColumn {
    pub column_name: String,
    /// 省略时与列名相同
    pub property_name: Option<String>,
    #[serde(default = "default_additional_type")]
    pub data_type: ColumnType,
}

fn default_additional_type() -> ColumnType {
    ColumnType::Text
}

impl AdditionalDataColumn {
    pub fn new(column_name: impl Into<String>, data_type: ColumnType) -> Self {
        Self {
            column_name: column_name.into(),
            property_name: None,
            data_type,
        }
    }

    pub fn with_property(mut self, property_name: impl Into<String>) -> Self {
        self.property_name = Some(property_name.into());
        self
    }

    fn mapping(&self) -> Result<DataColumnMapping> {
        DataColumnMapping::new(
            &self.column_name,
            self.data_type,
            self.property_name.as_deref(),
        )
    }
}

/// 已校验的 (列名, 目标类型, 源属性名) 三元组
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataColumnMapping {
    column_name: String,
    data_type: ColumnType,
    property_name: String,
}

impl DataColumnMapping {
    pub fn new(
        column_name: &str,
        data_type: ColumnType,
        property_name: Option<&str>,
    ) -> Result<Self> {
        if column_name.trim().is_empty() {
            return Err(PgSinkError::config("Column name cannot be blank"));
        }
        let property_name = property_name.unwrap_or(column_name);
        if property_name.trim().is_empty() {
            return Err(PgSinkError::config(format!(
                "Property name for column '{}' cannot be blank",
                column_name
            )));
        }
        Ok(Self {
            column_name: column_name.to_string(),
            data_type,
            property_name: property_name.to_string(),
        })
    }

    pub fn column_name(&self) -> &str {
        &self.column_name
    }

    pub fn data_type(&self) -> ColumnType {
        self.data_type
    }

    pub fn property_name(&self) -> &str {
        &self.property_name
    }
}

/// 只允许覆盖列名的标准列配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnNameConfig {
    pub column_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LevelColumnConfig {
    pub column_name: Option<String>,
    #[serde(default)]
    pub store_as_smallint: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeStampColumnConfig {
    pub column_name: Option<String>,
    #[serde(default)]
    pub convert_to_utc: bool,
}

/// Properties / LogEvent 列配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonColumnConfig {
    pub column_name: Option<String>,
    #[serde(default)]
    pub exclude_additional_properties: bool,
}

/// [`ColumnOptions`] 的可反序列化形式
///
/// ```toml
/// store = ["message", "level", "timestamp", "properties"]
///
/// [level]
/// store_as_smallint = true
///
/// [[additional]]
/// column_name = "user_id"
/// property_name = "UserId"
/// data_type = "bigint"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnOptionsConfig {
    /// 省略时启用全部标准列
    pub store: Option<Vec<StandardColumn>>,
    #[serde(default)]
    pub message: ColumnNameConfig,
    #[serde(default)]
    pub message_template: ColumnNameConfig,
    #[serde(default)]
    pub level: LevelColumnConfig,
    #[serde(default, alias = "time_stamp")]
    pub timestamp: TimeStampColumnConfig,
    #[serde(default)]
    pub exception: ColumnNameConfig,
    #[serde(default)]
    pub properties: JsonColumnConfig,
    #[serde(default)]
    pub log_event: JsonColumnConfig,
    #[serde(default)]
    pub additional: Vec<AdditionalDataColumn>,
}

impl ColumnOptionsConfig {
    fn name_override(&self, column: StandardColumn) -> Option<&str> {
        match column {
            StandardColumn::Message => self.message.column_name.as_deref(),
            StandardColumn::MessageTemplate => self.message_template.column_name.as_deref(),
            StandardColumn::Level => self.level.column_name.as_deref(),
            StandardColumn::TimeStamp => self.timestamp.column_name.as_deref(),
            StandardColumn::Exception => self.exception.column_name.as_deref(),
            StandardColumn::Properties => self.properties.column_name.as_deref(),
            StandardColumn::LogEvent => self.log_event.column_name.as_deref(),
        }
    }
}

/// 不可变的列配置快照
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnOptions {
    store: Vec<StandardColumn>,
    names: HashMap<StandardColumn, String>,
    level_store_as_smallint: bool,
    timestamp_convert_to_utc: bool,
    properties_exclude_additional: bool,
    log_event_exclude_additional: bool,
    additional_columns: Vec<DataColumnMapping>,
    /// 重定向到附加列的属性名（小写）
    redirected_properties: HashSet<String>,
}

impl Default for ColumnOptions {
    fn default() -> Self {
        Self::builder()
            .build()
            .unwrap_or_else(|_| unreachable!("default column options are valid"))
    }
}

impl TryFrom<ColumnOptionsConfig> for ColumnOptions {
    type Error = PgSinkError;

    fn try_from(config: ColumnOptionsConfig) -> Result<Self> {
        let store = config
            .store
            .clone()
            .unwrap_or_else(|| StandardColumn::ALL.to_vec());

        let mut seen_standard = HashSet::new();
        for column in &store {
            if !seen_standard.insert(*column) {
                return Err(PgSinkError::config(format!(
                    "Standard column {:?} is listed more than once",
                    column
                )));
            }
        }

        let mut names = HashMap::new();
        for column in StandardColumn::ALL {
            let name = match config.name_override(column) {
                Some(name) if name.trim().is_empty() => {
                    return Err(PgSinkError::config(format!(
                        "Column name for {:?} cannot be blank",
                        column
                    )));
                }
                Some(name) => name.to_string(),
                None => column.default_name().to_string(),
            };
            names.insert(column, name);
        }

        let additional_columns = config
            .additional
            .iter()
            .map(AdditionalDataColumn::mapping)
            .collect::<Result<Vec<_>>>()?;

        if store.is_empty() && additional_columns.is_empty() {
            return Err(PgSinkError::config("At least one column must be configured"));
        }

        let mut seen_names = HashSet::new();
        let active_names = store
            .iter()
            .map(|column| names[column].as_str())
            .chain(additional_columns.iter().map(DataColumnMapping::column_name));
        for name in active_names {
            if !seen_names.insert(name.to_lowercase()) {
                return Err(PgSinkError::config(format!(
                    "Duplicate column name '{}'",
                    name
                )));
            }
        }

        let redirected_properties = additional_columns
            .iter()
            .map(|mapping| mapping.property_name().to_lowercase())
            .collect();

        Ok(Self {
            store,
            names,
            level_store_as_smallint: config.level.store_as_smallint,
            timestamp_convert_to_utc: config.timestamp.convert_to_utc,
            properties_exclude_additional: config.properties.exclude_additional_properties,
            log_event_exclude_additional: config.log_event.exclude_additional_properties,
            additional_columns,
            redirected_properties,
        })
    }
}

impl ColumnOptions {
    pub fn builder() -> ColumnOptionsBuilder {
        ColumnOptionsBuilder::default()
    }

    /// 启用的标准列，按存储顺序
    pub fn store(&self) -> &[StandardColumn] {
        &self.store
    }

    pub fn is_stored(&self, column: StandardColumn) -> bool {
        self.store.contains(&column)
    }

    /// 解析后的列名：显式覆盖优先，否则为内置名
    pub fn column_name(&self, column: StandardColumn) -> &str {
        self.names
            .get(&column)
            .map(String::as_str)
            .unwrap_or_else(|| column.default_name())
    }

    /// 标准列在表中的类型
    pub fn column_type(&self, column: StandardColumn) -> ColumnType {
        match column {
            StandardColumn::Message
            | StandardColumn::MessageTemplate
            | StandardColumn::Exception => ColumnType::Text,
            StandardColumn::Level if self.level_store_as_smallint => ColumnType::SmallInt,
            StandardColumn::Level => ColumnType::Text,
            StandardColumn::TimeStamp => ColumnType::TimestampTz,
            StandardColumn::Properties | StandardColumn::LogEvent => ColumnType::Jsonb,
        }
    }

    pub fn level_store_as_smallint(&self) -> bool {
        self.level_store_as_smallint
    }

    pub fn timestamp_convert_to_utc(&self) -> bool {
        self.timestamp_convert_to_utc
    }

    pub fn properties_exclude_additional(&self) -> bool {
        self.properties_exclude_additional
    }

    pub fn log_event_exclude_additional(&self) -> bool {
        self.log_event_exclude_additional
    }

    pub fn additional_columns(&self) -> &[DataColumnMapping] {
        &self.additional_columns
    }

    /// 属性是否被某个附加列接管（忽略大小写）
    pub fn is_redirected(&self, property_name: &str) -> bool {
        self.redirected_properties
            .contains(&property_name.to_lowercase())
    }
}

/// [`ColumnOptions`] 构建器
#[derive(Debug, Clone, Default)]
pub struct ColumnOptionsBuilder {
    config: ColumnOptionsConfig,
}

impl ColumnOptionsBuilder {
    pub fn store(mut self, columns: impl IntoIterator<Item = StandardColumn>) -> Self {
        self.config.store = Some(columns.into_iter().collect());
        self
    }

    pub fn column_name(mut self, column: StandardColumn, name: impl Into<String>) -> Self {
        let name = Some(name.into());
        match column {
            StandardColumn::Message => self.config.message.column_name = name,
            StandardColumn::MessageTemplate => self.config.message_template.column_name = name,
            StandardColumn::Level => self.config.level.column_name = name,
            StandardColumn::TimeStamp => self.config.timestamp.column_name = name,
            StandardColumn::Exception => self.config.exception.column_name = name,
            StandardColumn::Properties => self.config.properties.column_name = name,
            StandardColumn::LogEvent => self.config.log_event.column_name = name,
        }
        self
    }

    pub fn level_as_smallint(mut self, enabled: bool) -> Self {
        self.config.level.store_as_smallint = enabled;
        self
    }

    pub fn timestamp_convert_to_utc(mut self, enabled: bool) -> Self {
        self.config.timestamp.convert_to_utc = enabled;
        self
    }

    pub fn properties_exclude_additional(mut self, enabled: bool) -> Self {
        self.config.properties.exclude_additional_properties = enabled;
        self
    }

    pub fn log_event_exclude_additional(mut self, enabled: bool) -> Self {
        self.config.log_event.exclude_additional_properties = enabled;
        self
    }

    pub fn additional_column(mut self, column: AdditionalDataColumn) -> Self {
        self.config.additional.push(column);
        self
    }

    pub fn build(self) -> Result<ColumnOptions> {
        ColumnOptions::try_from(self.config)
    }
}
