//! 环境变量配置模块
//!
//! 连接串通常含有凭证，不应写进配置文件；此模块从环境变量读取连接设置。
//! 空值视为未设置。

use std::env;

pub const CONNECTION_STRING_VAR: &str = "QUANTUM_PG_CONNECTION_STRING";
pub const SCHEMA_VAR: &str = "QUANTUM_PG_SCHEMA";
pub const TABLE_VAR: &str = "QUANTUM_PG_TABLE";

/// 环境变量配置管理器
pub struct EnvConfig;

impl EnvConfig {
    /// 从环境变量读取连接串
    pub fn get_connection_string() -> Option<String> {
        read(CONNECTION_STRING_VAR)
    }

    /// 从环境变量读取 schema 名
    pub fn get_schema_name() -> Option<String> {
        read(SCHEMA_VAR)
    }

    /// 从环境变量读取表名
    pub fn get_table_name() -> Option<String> {
        read(TABLE_VAR)
    }
}

fn read(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}
