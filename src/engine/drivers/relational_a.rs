//! RelationalA driver — a double-quote-identifier relational engine
//! (Postgres-family). Grounded on the teacher's `PostgresDriver`: a lazily
//! created `sqlx::PgPool` per connection id, reused across calls.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column as _, Row, TypeInfo};
use tokio::sync::RwLock;

use crate::engine::{normalize, traits::EngineDriver, DEFAULT_CALL_TIMEOUT_MS};
use crate::error::{AppError, AppResult};
use crate::types::{
    Column, ConnectionDescriptor, ForeignKey, Index, QueryResult, QueryStatus, ScalarValue, Schema,
    Table,
};

pub struct RelationalADriver {
    pools: RwLock<HashMap<String, PgPool>>,
}

impl RelationalADriver {
    pub fn new() -> Self {
        Self { pools: RwLock::new(HashMap::new()) }
    }

    fn connection_string(descriptor: &ConnectionDescriptor) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            descriptor.credentials.username,
            descriptor.credentials.password.expose(),
            descriptor.host,
            descriptor.port,
            descriptor.database,
        )
    }

    async fn pool(&self, descriptor: &ConnectionDescriptor) -> AppResult<PgPool> {
        {
            let pools = self.pools.read().await;
            if let Some(pool) = pools.get(&descriptor.connection_id) {
                return Ok(pool.clone());
            }
        }

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&Self::connection_string(descriptor))
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("password authentication failed") {
                    AppError::unauthorized(msg)
                } else {
                    AppError::execution(msg)
                }
            })?;

        let mut pools = self.pools.write().await;
        pools.insert(descriptor.connection_id.clone(), pool.clone());
        Ok(pool)
    }

    fn convert_row(row: &PgRow) -> Vec<ScalarValue> {
        row.columns().iter().enumerate().map(|(i, _)| extract_value(row, i)).collect()
    }

    fn column_info(row: &PgRow) -> Vec<(String, String)> {
        row.columns()
            .iter()
            .map(|c| (c.name().to_string(), c.type_info().name().to_string()))
            .collect()
    }
}

fn extract_value(row: &PgRow, idx: usize) -> ScalarValue {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(ScalarValue::Int64).unwrap_or(ScalarValue::Null);
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
impl EngineDriver for RelationalADriver {
    fn kind_name(&self) -> &'static str {
        "relational_a"
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
            // Cursor closes when `conn` drops at the end of this scope.
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

        let namespace_rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT nspname FROM pg_catalog.pg_namespace
            WHERE nspname NOT IN ('information_schema', 'pg_catalog', 'pg_toast')
              AND nspname NOT LIKE 'pg_temp_%'
            ORDER BY nspname
            "#,
        )
        .fetch_all(&pool)
        .await
        .map_err(|e| AppError::extraction(e.to_string()))?;

        let namespaces: BTreeSet<String> = namespace_rows.into_iter().map(|(n,)| n).collect();
        let mut tables = Vec::new();

        for schema_name in &namespaces {
            let table_rows: Vec<(String,)> = sqlx::query_as(
                "SELECT table_name FROM information_schema.tables WHERE table_schema = $1 ORDER BY table_name",
            )
            .bind(schema_name)
            .fetch_all(&pool)
            .await
            .map_err(|e| AppError::extraction(e.to_string()))?;

            for (table_name,) in table_rows {
                tables.push(self.describe_table(&pool, schema_name, &table_name).await?);
            }
        }

        let (_, database_name) = ("", descriptor.database.clone());

        Ok(Schema {
            engine: crate::types::EngineKind::RelationalA,
            database_name,
            namespaces,
            tables,
        })
    }

    async fn release(&self, connection_id: &str) {
        self.pools.write().await.remove(connection_id);
    }
}

impl RelationalADriver {
    async fn describe_table(&self, pool: &PgPool, schema: &str, table: &str) -> AppResult<Table> {
        let column_rows: Vec<(String, String, String, Option<String>, i32, Option<i64>)> = sqlx::query_as(
            r#"
            SELECT column_name::text, data_type::text, is_nullable::text, column_default::text,
                   ordinal_position::int, character_maximum_length::bigint
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
            "#,
        )
        .bind(schema)
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::extraction(e.to_string()))?;

        let pk_rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT a.attname::text
            FROM pg_index i
            JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
            JOIN pg_class c ON c.oid = i.indrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE i.indisprimary AND n.nspname = $1 AND c.relname = $2
            ORDER BY array_position(i.indkey, a.attnum)
            "#,
        )
        .bind(schema)
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::extraction(e.to_string()))?;
        let primary_key: BTreeSet<String> = pk_rows.into_iter().map(|(n,)| n).collect();

        let fk_rows: Vec<(String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT kcu.column_name::text, ccu.table_name::text, ccu.column_name::text, ccu.table_schema::text
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema
            JOIN information_schema.constraint_column_usage ccu
              ON ccu.constraint_name = tc.constraint_name AND ccu.table_schema = tc.table_schema
            WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = $1 AND tc.table_name = $2
            "#,
        )
        .bind(schema)
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::extraction(e.to_string()))?;

        let foreign_keys = fk_rows
            .into_iter()
            .map(|(column, ref_table, ref_column, ref_schema)| ForeignKey {
                column,
                referenced_namespace: Some(ref_schema),
                referenced_table: ref_table,
                referenced_column: ref_column,
                heuristic: false,
            })
            .collect();

        let index_rows: Vec<(String, Vec<String>, bool, bool)> = sqlx::query_as(
            r#"
            SELECT i.relname AS index_name,
                   array_agg(a.attname ORDER BY x.ordinality)::text[] AS columns,
                   ix.indisunique, ix.indisprimary
            FROM pg_index ix
            JOIN pg_class i ON i.oid = ix.indexrelid
            JOIN pg_class t ON t.oid = ix.indrelid
            JOIN pg_namespace n ON n.oid = t.relnamespace
            CROSS JOIN LATERAL unnest(ix.indkey) WITH ORDINALITY AS x(attnum, ordinality)
            JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = x.attnum
            WHERE n.nspname = $1 AND t.relname = $2
            GROUP BY i.relname, ix.indisunique, ix.indisprimary
            "#,
        )
        .bind(schema)
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::extraction(e.to_string()))?;

        let indexes = index_rows
            .into_iter()
            .map(|(name, columns, is_unique, is_primary)| Index { name, columns, is_unique, is_primary })
            .collect();

        let columns = column_rows
            .into_iter()
            .map(|(name, data_type, is_nullable, default_value, ordinal, size)| Column {
                name,
                type_name: data_type,
                size,
                nullable: is_nullable == "YES",
                default_value,
                comment: None,
                ordinal,
            })
            .collect();

        Ok(Table {
            namespace: schema.to_string(),
            name: table.to_string(),
            comment: None,
            columns,
            primary_key,
            foreign_keys,
            indexes,
        })
    }
}

impl Default for RelationalADriver {
    fn default() -> Self {
        Self::new()
    }
}
