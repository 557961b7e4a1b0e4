//! PostgreSQL 批量写入
//!
//! 一次刷新对应一个事务：行被分成若干条多行 `INSERT` 语句发送，每条语句的
//! 绑定参数数量不超过 PostgreSQL 的上限，事务提交前任何一条语句失败都会让
//! 整批回滚。

use crate::sinks::database::rows::ColumnDescriptor;

/// PostgreSQL 单条语句允许的最大绑定参数数
pub const MAX_BIND_PARAMETERS: usize = 65_535;

/// 单条语句能容纳的行数
pub fn rows_per_statement(column_count: usize) -> usize {
    (MAX_BIND_PARAMETERS / column_count.max(1)).max(1)
}

/// 构建多行 `INSERT` 语句，占位符从 `$1` 开始按行优先编号
///
/// JSON 列的参数以文本绑定，在语句中显式转换为列类型。
pub fn build_insert_sql(table: &str, columns: &[ColumnDescriptor], row_count: usize) -> String {
    let column_list = columns
        .iter()
        .map(ColumnDescriptor::quoted_name)
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!("INSERT INTO {} ({}) VALUES ", table, column_list);
    let mut parameter = 1;
    for row in 0..row_count {
        if row > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for (index, column) in columns.iter().enumerate() {
            if index > 0 {
                sql.push_str(", ");
            }
            sql.push('$');
            sql.push_str(&parameter.to_string());
            if column.column_type.is_json() {
                sql.push_str("::");
                sql.push_str(column.column_type.sql_name());
            }
            parameter += 1;
        }
        sql.push(')');
    }
    sql
}

#[cfg(feature = "postgres")]
pub use self::postgres::PostgresCopyClient;

#[cfg(feature = "postgres")]
mod postgres {
    use async_trait::async_trait;
    use diesel::pg::{Pg, PgConnection};
    use diesel::prelude::*;
    use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
    use diesel::r2d2::{ConnectionManager, Pool};
    use diesel::sql_types;
    use std::time::Duration;
    use tracing::debug;

    use super::{build_insert_sql, rows_per_statement};
    use crate::columns::ColumnType;
    use crate::error::{PgSinkError, Result};
    use crate::sinks::database::rows::{BulkLoad, ColumnValue};
    use crate::sinks::traits::BulkCopyClient;

    type PostgresPool = Pool<ConnectionManager<PgConnection>>;
    type BoxedQuery<'a> = BoxedSqlQuery<'a, Pg, SqlQuery>;

    /// 基于 diesel + r2d2 连接池的批量写入客户端
    #[derive(Clone)]
    pub struct PostgresCopyClient {
        pool: PostgresPool,
    }

    impl std::fmt::Debug for PostgresCopyClient {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("PostgresCopyClient")
                .field("pool", &"<PostgresPool>")
                .finish()
        }
    }

    impl PostgresCopyClient {
        /// 创建连接池，连接在第一次刷新时才建立
        pub fn new(
            connection_string: &str,
            pool_size: u32,
            connection_timeout: Duration,
        ) -> Result<Self> {
            if connection_string.trim().is_empty() {
                return Err(PgSinkError::config("Connection string cannot be blank"));
            }
            let manager = ConnectionManager::<PgConnection>::new(connection_string);
            let pool = Pool::builder()
                .max_size(pool_size.max(1))
                .connection_timeout(connection_timeout)
                .build_unchecked(manager);
            Ok(Self { pool })
        }

        fn copy_blocking(pool: PostgresPool, load: BulkLoad) -> Result<u64> {
            let mut conn = pool
                .get()
                .map_err(|e| PgSinkError::database(format!("获取 PostgreSQL 连接失败: {}", e)))?;

            let table = load.table.quoted();
            let columns = load.columns;
            let chunk_size = rows_per_statement(columns.len());
            let mut rows = load.rows.into_iter().peekable();

            conn.transaction::<u64, diesel::result::Error, _>(|conn| {
                let mut written = 0u64;
                while rows.peek().is_some() {
                    let chunk: Vec<Vec<ColumnValue>> = rows.by_ref().take(chunk_size).collect();
                    let sql = build_insert_sql(&table, &columns, chunk.len());
                    let mut query = diesel::sql_query(sql).into_boxed::<Pg>();
                    for value in chunk.into_iter().flatten() {
                        query = bind_value(query, value);
                    }
                    written += query.execute(conn)? as u64;
                }
                Ok(written)
            })
            .map_err(|e| PgSinkError::database(format!("PostgreSQL 批量写入失败: {}", e)))
        }
    }

    fn bind_value(query: BoxedQuery<'static>, value: ColumnValue) -> BoxedQuery<'static> {
        match value {
            ColumnValue::Null(column_type) => bind_null(query, column_type),
            ColumnValue::Text(v) | ColumnValue::Json(v) => query.bind::<sql_types::Text, _>(v),
            ColumnValue::SmallInt(v) => query.bind::<sql_types::SmallInt, _>(v),
            ColumnValue::Integer(v) => query.bind::<sql_types::Integer, _>(v),
            ColumnValue::BigInt(v) => query.bind::<sql_types::BigInt, _>(v),
            ColumnValue::Real(v) => query.bind::<sql_types::Float, _>(v),
            ColumnValue::Double(v) => query.bind::<sql_types::Double, _>(v),
            ColumnValue::Boolean(v) => query.bind::<sql_types::Bool, _>(v),
            ColumnValue::Timestamp(v) => query.bind::<sql_types::Timestamp, _>(v),
            ColumnValue::TimestampTz(v) => query.bind::<sql_types::Timestamptz, _>(v),
            ColumnValue::Date(v) => query.bind::<sql_types::Date, _>(v),
        }
    }

    fn bind_null(query: BoxedQuery<'static>, column_type: ColumnType) -> BoxedQuery<'static> {
        use sql_types::Nullable;

        match column_type {
            ColumnType::Text | ColumnType::Varchar | ColumnType::Json | ColumnType::Jsonb => {
                query.bind::<Nullable<sql_types::Text>, _>(None::<String>)
            }
            ColumnType::SmallInt => query.bind::<Nullable<sql_types::SmallInt>, _>(None::<i16>),
            ColumnType::Integer => query.bind::<Nullable<sql_types::Integer>, _>(None::<i32>),
            ColumnType::BigInt => query.bind::<Nullable<sql_types::BigInt>, _>(None::<i64>),
            ColumnType::Real => query.bind::<Nullable<sql_types::Float>, _>(None::<f32>),
            ColumnType::Double => query.bind::<Nullable<sql_types::Double>, _>(None::<f64>),
            ColumnType::Boolean => query.bind::<Nullable<sql_types::Bool>, _>(None::<bool>),
            ColumnType::Timestamp => {
                query.bind::<Nullable<sql_types::Timestamp>, _>(None::<chrono::NaiveDateTime>)
            }
            ColumnType::TimestampTz => query
                .bind::<Nullable<sql_types::Timestamptz>, _>(
                    None::<chrono::DateTime<chrono::FixedOffset>>,
                ),
            ColumnType::Date => {
                query.bind::<Nullable<sql_types::Date>, _>(None::<chrono::NaiveDate>)
            }
        }
    }

    #[async_trait]
    impl BulkCopyClient for PostgresCopyClient {
        async fn copy_rows(&self, load: BulkLoad) -> Result<u64> {
            let pool = self.pool.clone();
            let table = load.table.to_string();
            let row_count = load.row_count();

            debug!(target: "quantum_pg_sink::copy", table = %table, row_count, "写入批次");

            // diesel 是同步 API，放到阻塞线程池执行
            tokio::task::spawn_blocking(move || Self::copy_blocking(pool, load))
                .await
                .map_err(|e| PgSinkError::background_task(format!("数据库写入任务执行失败: {}", e)))?
        }

        async fn is_healthy(&self) -> bool {
            let pool = self.pool.clone();
            tokio::task::spawn_blocking(move || pool.get().is_ok())
                .await
                .unwrap_or(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::ColumnType;

    fn columns() -> Vec<ColumnDescriptor> {
        vec![
            ColumnDescriptor::new("message", ColumnType::Text),
            ColumnDescriptor::new("level", ColumnType::SmallInt),
            ColumnDescriptor::new("properties", ColumnType::Jsonb),
        ]
    }

    #[test]
    fn test_insert_sql_numbers_parameters_row_major() {
        let sql = build_insert_sql(r#""public"."logs""#, &columns(), 2);
        assert_eq!(
            sql,
            concat!(
                r#"INSERT INTO "public"."logs" ("message", "level", "properties") VALUES "#,
                "($1, $2, $3::jsonb), ($4, $5, $6::jsonb)"
            )
        );
    }

    #[test]
    fn test_json_cast_uses_declared_type() {
        let sql = build_insert_sql(
            r#""s"."t""#,
            &[ColumnDescriptor::new("payload", ColumnType::Json)],
            1,
        );
        assert!(sql.ends_with("VALUES ($1::json)"));
    }

    #[test]
    fn test_rows_per_statement_stays_under_parameter_limit() {
        assert_eq!(rows_per_statement(7), 9_362);
        assert!(rows_per_statement(7) * 7 <= MAX_BIND_PARAMETERS);
        assert_eq!(rows_per_statement(0), MAX_BIND_PARAMETERS);
        assert_eq!(rows_per_statement(100_000), 1);
    }
}
