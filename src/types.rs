//! Core data model shared across every component.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::observability::Sensitive;

/// The three engine kinds this core can speak to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Double-quote identifier quoting, e.g. a Postgres-family engine.
    RelationalA,
    /// Backtick identifier quoting, e.g. a MySQL-family engine.
    RelationalB,
    /// Schemaless, JSON-document collections.
    Document,
}

impl EngineKind {
    pub fn is_relational(self) -> bool {
        matches!(self, Self::RelationalA | Self::RelationalB)
    }

    pub fn quote_ident(self, ident: &str) -> String {
        match self {
            Self::RelationalA => format!("\"{}\"", ident.replace('"', "\"\"")),
            Self::RelationalB => format!("`{}`", ident.replace('`', "``")),
            Self::Document => ident.to_string(),
        }
    }
}

/// Credentials for reaching a database. Never logged or serialized in the clear.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: Sensitive<String>,
}

/// Identifies how to reach a specific database for a specific owner.
///
/// Immutable once registered; only the owning user may resolve one (see
/// `ConnectionRegistry::resolve`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub user_id: String,
    pub connection_id: String,
    pub engine: EngineKind,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub credentials: Credentials,
    pub properties: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub type_name: String,
    pub size: Option<i64>,
    pub nullable: bool,
    pub default_value: Option<String>,
    pub comment: Option<String>,
    pub ordinal: i32,
}

/// A foreign key from `column` in the owning table to `(namespace, table, column)`.
///
/// `heuristic` is set when the edge was inferred from a naming convention
/// (document engines only) rather than read from engine metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub referenced_namespace: Option<String>,
    pub referenced_table: String,
    pub referenced_column: String,
    pub heuristic: bool,
}

impl ForeignKey {
    /// The referenced table's `Table::id()` form, for matching against a
    /// ranked-table id set.
    pub fn referenced_id(&self) -> String {
        match &self.referenced_namespace {
            Some(ns) if !ns.is_empty() => format!("{}.{}", ns, self.referenced_table),
            _ => self.referenced_table.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub namespace: String,
    pub name: String,
    pub comment: Option<String>,
    pub columns: Vec<Column>,
    pub primary_key: BTreeSet<String>,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<Index>,
}

impl Table {
    /// Canonical identifier: `"{namespace}.{name}"` for relational tables,
    /// `"{collection}"` for document collections (empty namespace).
    pub fn id(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }
}

/// An immutable, engine-neutral snapshot of a database produced atomically
/// by the SchemaExtractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub engine: EngineKind,
    pub database_name: String,
    pub namespaces: BTreeSet<String>,
    pub tables: Vec<Table>,
}

impl Schema {
    pub fn find_table(&self, table_id: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.id() == table_id)
    }

    pub fn find_table_by_name(&self, name: &str) -> Option<&Table> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }
}

/// One embedding per table, used by the VectorIndex for similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaEmbedding {
    pub id: Uuid,
    pub connection_id: String,
    pub user_id: String,
    pub table_id: String,
    pub text: String,
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

pub const EMBEDDING_DIM: usize = 384;

/// The assembled, ranked context handed to the LLM for a single request.
/// Discarded after the call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptContext {
    pub engine: EngineKind,
    pub database_name: String,
    pub ranked_tables: Vec<(String, f32, String)>,
    pub relationships: Vec<ForeignKey>,
    pub join_hints: Vec<String>,
    pub memory_key: String,
}

/// A model-generated query, not yet validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedQuery {
    pub engine: EngineKind,
    pub text: String,
    pub explanation: String,
}

/// The unified scalar set every engine value is normalized into (§6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ScalarValue {
    Int64(i64),
    Float64(f64),
    Bool(bool),
    String(String),
    Null,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum QueryStatus {
    Success,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<(String, String)>,
    pub rows: Vec<Vec<ScalarValue>>,
    pub row_count: u64,
    pub elapsed_ms: f64,
    pub status: QueryStatus,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            elapsed_ms: 0.0,
            status: QueryStatus::Success,
        }
    }
}

/// The tagged union every `ask` call returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    KnowledgeAnswer { text: String },
    Chat { text: String },
    Query { text: String, explanation: String, result: QueryResult },
    Blocked { text: String, reason: String },
    Error { kind: String, message: String },
}
