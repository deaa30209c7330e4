//! RelationalB driver — a backtick-identifier relational engine
//! (MySQL-family). Grounded on the teacher's `MySqlDriver`: the same
//! pool-per-connection-id shape, adapted to `sqlx::MySqlPool`, with the
//! teacher's long `try_get` cascade for untyped column extraction.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column as _, Row};
use tokio::sync::RwLock;

use crate::engine::{normalize, traits::EngineDriver, DEFAULT_CALL_TIMEOUT_MS};
use crate::error::{AppError, AppResult};
use crate::types::{
    Column, ConnectionDescriptor, ForeignKey, Index, QueryResult, QueryStatus, ScalarValue, Schema,
    Table,
};

pub struct RelationalBDriver {
    pools: RwLock<HashMap<String, MySqlPool>>,
}

impl RelationalBDriver {
    pub fn new() -> Self {
        Self { pools: RwLock::new(HashMap::new()) }
    }

    fn connection_string(descriptor: &ConnectionDescriptor) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            descriptor.credentials.username,
            descriptor.credentials.password.expose(),
            descriptor.host,
            descriptor.port,
            descriptor.database,
        )
    }

    async fn pool(&self, descriptor: &ConnectionDescriptor) -> AppResult<MySqlPool> {
        {
            let pools = self.pools.read().await;
            if let Some(pool) = pools.get(&descriptor.connection_id) {
                return Ok(pool.clone());
            }
        }

        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&Self::connection_string(descriptor))
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("Access denied") {
                    AppError::unauthorized(msg)
                } else {
                    AppError::execution(msg)
                }
            })?;

        let mut pools = self.pools.write().await;
        pools.insert(descriptor.connection_id.clone(), pool.clone());
        Ok(pool)
    }

    fn column_info(row: &MySqlRow) -> Vec<(String, String)> {
        row.columns().iter().map(|c| (c.name().to_string(), c.type_info().to_string())).collect()
    }

    fn convert_row(row: &MySqlRow) -> Vec<ScalarValue> {
        (0..row.columns().len()).map(|i| extract_value(row, i)).collect()
    }
}

/// Mirrors the teacher's `extract_value` cascade: try progressively wider
/// integer/float/text/temporal/binary types until one of them matches the
/// driver-reported column type, falling back to Null.
fn extract_value(row: &MySqlRow, idx: usize) -> ScalarValue {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(ScalarValue::Int64).unwrap_or(ScalarValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
        return v.map(|n| ScalarValue::Int64(n as i64)).unwrap_or(ScalarValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
        return v.map(|n| ScalarValue::Int64(n as i64)).unwrap_or(ScalarValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return v.map(ScalarValue::Bool).unwrap_or(ScalarValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map(ScalarValue::Float64).unwrap_or(ScalarValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<rust_decimal::Decimal>, _>(idx) {
        return v.map(normalize::decimal).unwrap_or(ScalarValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
        return v.map(normalize::timestamp).unwrap_or(ScalarValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
        return v
            .map(|ndt| normalize::timestamp(chrono::DateTime::from_naive_utc_and_offset(ndt, chrono::Utc)))
            .unwrap_or(ScalarValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
        return v.map(normalize::date).unwrap_or(ScalarValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(idx) {
        return v.as_ref().map(normalize::json_string).unwrap_or(ScalarValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return if v.is_some() { normalize::blob() } else { ScalarValue::Null };
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map(ScalarValue::String).unwrap_or(ScalarValue::Null);
    }
    ScalarValue::Null
}

#[async_trait]
impl EngineDriver for RelationalBDriver {
    fn kind_name(&self) -> &'static str {
        "relational_b"
    }

    #[tracing::instrument(skip(self, query_text))]
    async fn execute(
        &self,
        descriptor: &ConnectionDescriptor,
        query_text: &str,
        max_rows: u32,
    ) -> AppResult<QueryResult> {
        let pool = self.pool(descriptor).await?;
        let start = Instant::now();

        let fut = async {
            let mut conn = pool.acquire().await.map_err(|e| AppError::execution(e.to_string()))?;
            let mut stream = sqlx::query(query_text).fetch(&mut *conn);
            let mut columns: Vec<(String, String)> = Vec::new();
            let mut rows = Vec::new();

            while rows.len() < max_rows as usize {
                match stream.next().await {
                    Some(Ok(row)) => {
                        if columns.is_empty() {
                            columns = Self::column_info(&row);
                        }
                        rows.push(Self::convert_row(&row));
                    }
                    Some(Err(e)) => return Err(AppError::execution(e.to_string())),
                    None => break,
                }
            }
            drop(stream);
            Ok((columns, rows))
        };

        let (columns, rows) = tokio::time::timeout(Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS), fut)
            .await
            .map_err(|_| AppError::timeout(DEFAULT_CALL_TIMEOUT_MS))??;

        let row_count = rows.len() as u64;
        Ok(QueryResult {
            columns,
            rows,
            row_count,
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
            status: QueryStatus::Success,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn extract_schema(&self, descriptor: &ConnectionDescriptor) -> AppResult<Schema> {
        let pool = self.pool(descriptor).await?;

        // MySQL has no separate schema layer: "database" doubles as namespace.
        let namespaces: BTreeSet<String> = [descriptor.database.clone()].into_iter().collect();

        let table_rows: Vec<(String,)> = sqlx::query_as(
            "SELECT TABLE_NAME FROM information_schema.TABLES WHERE TABLE_SCHEMA = ? ORDER BY TABLE_NAME",
        )
        .bind(&descriptor.database)
        .fetch_all(&pool)
        .await
        .map_err(|e| AppError::extraction(e.to_string()))?;

        let mut tables = Vec::new();
        for (table_name,) in table_rows {
            tables.push(self.describe_table(&pool, &descriptor.database, &table_name).await?);
        }

        Ok(Schema {
            engine: crate::types::EngineKind::RelationalB,
            database_name: descriptor.database.clone(),
            namespaces,
            tables,
        })
    }

    async fn release(&self, connection_id: &str) {
        self.pools.write().await.remove(connection_id);
    }
}

impl RelationalBDriver {
    async fn describe_table(&self, pool: &MySqlPool, database: &str, table: &str) -> AppResult<Table> {
        let column_rows: Vec<(String, String, String, Option<String>, u32, Option<i64>, String)> = sqlx::query_as(
            r#"
            SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE, COLUMN_DEFAULT,
                   ORDINAL_POSITION, CHARACTER_MAXIMUM_LENGTH, COLUMN_KEY
            FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
            "#,
        )
        .bind(database)
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::extraction(e.to_string()))?;

        let primary_key: BTreeSet<String> = column_rows
            .iter()
            .filter(|(_, _, _, _, _, _, key)| key == "PRI")
            .map(|(name, ..)| name.clone())
            .collect();

        let fk_rows: Vec<(String, String, String)> = sqlx::query_as(
            r#"
            SELECT COLUMN_NAME, REFERENCED_TABLE_NAME, REFERENCED_COLUMN_NAME
            FROM information_schema.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND REFERENCED_TABLE_NAME IS NOT NULL
            "#,
        )
        .bind(database)
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::extraction(e.to_string()))?;

        let foreign_keys = fk_rows
            .into_iter()
            .map(|(column, ref_table, ref_column)| ForeignKey {
                column,
                referenced_namespace: Some(database.to_string()),
                referenced_table: ref_table,
                referenced_column: ref_column,
                heuristic: false,
            })
            .collect();

        let index_rows: Vec<(String, String, i32, i32)> = sqlx::query_as(
            r#"
            SELECT INDEX_NAME, COLUMN_NAME, NON_UNIQUE, SEQ_IN_INDEX
            FROM information_schema.STATISTICS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            ORDER BY INDEX_NAME, SEQ_IN_INDEX
            "#,
        )
        .bind(database)
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::extraction(e.to_string()))?;

        let mut grouped: HashMap<String, (Vec<String>, bool)> = HashMap::new();
        for (index_name, column_name, non_unique, _) in index_rows {
            let entry = grouped.entry(index_name).or_insert_with(|| (Vec::new(), non_unique == 0));
            entry.0.push(column_name);
        }
        let indexes = grouped
            .into_iter()
            .map(|(name, (columns, is_unique))| Index {
                is_primary: name == "PRIMARY",
                name,
                columns,
                is_unique,
            })
            .collect();

        let columns = column_rows
            .into_iter()
            .map(|(name, data_type, is_nullable, default_value, ordinal, size, _)| Column {
                name,
                type_name: data_type,
                size,
                nullable: is_nullable == "YES",
                default_value,
                comment: None,
                ordinal: ordinal as i32,
            })
            .collect();

        Ok(Table {
            namespace: database.to_string(),
            name: table.to_string(),
            comment: None,
            columns,
            primary_key,
            foreign_keys,
            indexes,
        })
    }
}

impl Default for RelationalBDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::Sensitive;
    use crate::types::{Credentials, EngineKind};

    #[test]
    fn connection_string_uses_backtick_engine_fields() {
        let descriptor = ConnectionDescriptor {
            user_id: "u".to_string(),
            connection_id: "c1".to_string(),
            engine: EngineKind::RelationalB,
            host: "db.internal".to_string(),
            port: 3306,
            database: "shop".to_string(),
            credentials: Credentials {
                username: "root".to_string(),
                password: Sensitive::new("pw".to_string()),
            },
            properties: HashMap::new(),
        };

        let conn_str = RelationalBDriver::connection_string(&descriptor);
        assert!(conn_str.contains("db.internal:3306"));
        assert!(conn_str.contains("shop"));
    }
}
