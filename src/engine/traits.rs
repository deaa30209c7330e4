//! EngineDriver trait — direct generalization of the teacher's `DataEngine`
//! trait to a single read-only `execute` operation plus the schema
//! introspection SchemaExtractor needs.

use async_trait::async_trait;

use crate::error::AppResult;
use crate::types::{ConnectionDescriptor, QueryResult, Schema};

#[async_trait]
pub trait EngineDriver: Send + Sync {
    fn kind_name(&self) -> &'static str;

    /// Executes `query_text` against the database identified by
    /// `descriptor`, reading at most `max_rows`, applying the per-call
    /// timeout internally. Never attempts a write — callers must only ever
    /// pass text that has already gone through `QuerySanitizer`.
    async fn execute(
        &self,
        descriptor: &ConnectionDescriptor,
        query_text: &str,
        max_rows: u32,
    ) -> AppResult<QueryResult>;

    /// Introspects the live database and produces a canonical Schema
    /// snapshot (SchemaExtractor, §4.3).
    async fn extract_schema(&self, descriptor: &ConnectionDescriptor) -> AppResult<Schema>;

    /// Releases any pooled resources held for this connection. Safe to call
    /// even if nothing was ever opened.
    async fn release(&self, connection_id: &str);
}
