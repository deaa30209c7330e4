//! Document driver — a schemaless, collection-of-JSON-documents engine
//! (Mongo-family). Grounded on the teacher's `MongoDriver`: a lazily
//! created `mongodb::Client` per connection id, JSON query text, and BSON
//! value conversion.

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use async_trait::async_trait;
use futures::stream::TryStreamExt;
use mongodb::bson::{Bson, Document};
use mongodb::options::ClientOptions;
use mongodb::Client;
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;

use crate::engine::{normalize, traits::EngineDriver, DEFAULT_CALL_TIMEOUT_MS};
use crate::error::{AppError, AppResult};
use crate::types::{
    Column, ConnectionDescriptor, ForeignKey, QueryResult, QueryStatus, ScalarValue, Schema, Table,
};

/// Fields every document-engine collection is assumed to carry by
/// convention, per spec.md §4.3, whether or not the sampled document has them.
const CONVENTIONAL_FIELDS: &[&str] = &["_id", "createdAt", "updatedAt", "deletedAt", "version"];

pub struct DocumentDriver {
    clients: RwLock<HashMap<String, Client>>,
}

impl DocumentDriver {
    pub fn new() -> Self {
        Self { clients: RwLock::new(HashMap::new()) }
    }

    fn uri(descriptor: &ConnectionDescriptor) -> String {
        format!(
            "mongodb://{}:{}@{}:{}/{}",
            descriptor.credentials.username,
            descriptor.credentials.password.expose(),
            descriptor.host,
            descriptor.port,
            descriptor.database,
        )
    }

    async fn client(&self, descriptor: &ConnectionDescriptor) -> AppResult<Client> {
        {
            let clients = self.clients.read().await;
            if let Some(client) = clients.get(&descriptor.connection_id) {
                return Ok(client.clone());
            }
        }

        let options = ClientOptions::parse(Self::uri(descriptor))
            .await
            .map_err(|e| AppError::execution(e.to_string()))?;
        let client = Client::with_options(options).map_err(|e| AppError::execution(e.to_string()))?;

        let mut clients = self.clients.write().await;
        clients.insert(descriptor.connection_id.clone(), client.clone());
        Ok(client)
    }
}

/// The single-operator query shape accepted from the LLM (spec.md §4.2, §4.10.3).
#[derive(Debug)]
enum ParsedQuery {
    Find { collection: String, filter: Document, limit: Option<i64> },
    Aggregate { collection: String, pipeline: Vec<Document> },
    Count { collection: String, filter: Document },
    Distinct { collection: String, field: String, filter: Document },
}

fn parse_query(query_text: &str) -> AppResult<ParsedQuery> {
    let value: JsonValue = serde_json::from_str(query_text.trim())
        .map_err(|e| AppError::invalid_input(format!("not valid JSON: {e}")))?;

    let obj = value
        .as_object()
        .ok_or_else(|| AppError::invalid_input("query must be a JSON object"))?;

    let ops = ["find", "aggregate", "count", "distinct"];
    let present: Vec<&str> = ops.iter().copied().filter(|op| obj.contains_key(*op)).collect();
    if present.len() != 1 {
        return Err(AppError::invalid_input(
            "query must contain exactly one of find, aggregate, count, distinct",
        ));
    }
    let op = present[0];

    // Standard MongoDB command shape: the operator key's own value is the
    // collection name, not a sibling `"collection"` field.
    let collection = obj
        .get(op)
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::invalid_input(format!("'{op}' must be the collection name as a string")))?
        .to_string();

    match op {
        "find" => {
            let filter = obj.get("filter").cloned().unwrap_or(JsonValue::Object(Default::default()));
            let filter = json_to_document(&filter)?;
            let limit = obj.get("limit").and_then(|v| v.as_i64());
            Ok(ParsedQuery::Find { collection, filter, limit })
        }
        "aggregate" => {
            let pipeline_json = obj
                .get("pipeline")
                .and_then(|v| v.as_array())
                .ok_or_else(|| AppError::invalid_input("aggregate requires a 'pipeline' array"))?;
            let mut pipeline = Vec::new();
            for stage in pipeline_json {
                pipeline.push(json_to_document(stage)?);
            }
            Ok(ParsedQuery::Aggregate { collection, pipeline })
        }
        "count" => {
            let filter = obj.get("filter").cloned().unwrap_or(JsonValue::Object(Default::default()));
            Ok(ParsedQuery::Count { collection, filter: json_to_document(&filter)? })
        }
        "distinct" => {
            let field = obj
                .get("field")
                .and_then(|v| v.as_str())
                .ok_or_else(|| AppError::invalid_input("distinct requires a 'field'"))?
                .to_string();
            let filter = obj.get("filter").cloned().unwrap_or(JsonValue::Object(Default::default()));
            Ok(ParsedQuery::Distinct { collection, field, filter: json_to_document(&filter)? })
        }
        _ => unreachable!(),
    }
}

fn json_to_document(value: &JsonValue) -> AppResult<Document> {
    let bson = mongodb::bson::to_bson(value).map_err(|e| AppError::invalid_input(e.to_string()))?;
    match bson {
        Bson::Document(doc) => Ok(doc),
        _ => Err(AppError::invalid_input("expected a JSON object")),
    }
}

fn has_limit_stage(pipeline: &[Document]) -> bool {
    pipeline.iter().any(|stage| stage.contains_key("$limit"))
}

fn document_to_row(doc: &Document, columns: &mut Vec<String>) -> Vec<ScalarValue> {
    let mut values = Vec::new();
    for key in doc.keys() {
        if !columns.contains(key) {
            columns.push(key.clone());
        }
    }
    for key in columns.iter() {
        values.push(doc.get(key).map(bson_to_scalar).unwrap_or(ScalarValue::Null));
    }
    values
}

fn bson_to_scalar(value: &Bson) -> ScalarValue {
    match value {
        Bson::Null => ScalarValue::Null,
        Bson::Boolean(b) => ScalarValue::Bool(*b),
        Bson::Int32(i) => ScalarValue::Int64(*i as i64),
        Bson::Int64(i) => ScalarValue::Int64(*i),
        Bson::Double(f) => ScalarValue::Float64(*f),
        Bson::Decimal128(d) => normalize::decimal(d.to_string()),
        Bson::String(s) => ScalarValue::String(s.clone()),
        Bson::ObjectId(oid) => normalize::object_id_hex(oid.to_hex()),
        Bson::DateTime(dt) => normalize::timestamp(dt.to_chrono()),
        Bson::Binary(_) => normalize::blob(),
        Bson::Array(_) | Bson::Document(_) => {
            let json: JsonValue = serde_json::to_value(value).unwrap_or(JsonValue::Null);
            normalize::json_string(&json)
        }
        other => ScalarValue::String(format!("{:?}", other)),
    }
}

#[async_trait]
impl EngineDriver for DocumentDriver {
    fn kind_name(&self) -> &'static str {
        "document"
    }

    #[tracing::instrument(skip(self, query_text))]
    async fn execute(
        &self,
        descriptor: &ConnectionDescriptor,
        query_text: &str,
        max_rows: u32,
    ) -> AppResult<QueryResult> {
        let client = self.client(descriptor).await?;
        let db = client.database(&descriptor.database);
        let start = Instant::now();
        let parsed = parse_query(query_text)?;

        let fut = async {
            let mut columns: Vec<String> = Vec::new();
            let rows: Vec<Vec<ScalarValue>> = match parsed {
                ParsedQuery::Find { collection, filter, limit } => {
                    let effective_limit = limit.map(|l| l.min(max_rows as i64)).unwrap_or(max_rows as i64);
                    let coll = db.collection::<Document>(&collection);
                    let mut cursor = coll
                        .find(filter)
                        .limit(effective_limit)
                        .await
                        .map_err(|e| AppError::execution(e.to_string()))?;
                    let mut out = Vec::new();
                    while let Some(doc) = cursor.try_next().await.map_err(|e| AppError::execution(e.to_string()))? {
                        out.push(document_to_row(&doc, &mut columns));
                    }
                    out
                }
                ParsedQuery::Aggregate { collection, mut pipeline } => {
                    if !has_limit_stage(&pipeline) {
                        let mut limit_stage = Document::new();
                        limit_stage.insert("$limit", max_rows as i64);
                        pipeline.push(limit_stage);
                    }
                    let coll = db.collection::<Document>(&collection);
                    let mut cursor =
                        coll.aggregate(pipeline).await.map_err(|e| AppError::execution(e.to_string()))?;
                    let mut out = Vec::new();
                    while let Some(doc) = cursor.try_next().await.map_err(|e| AppError::execution(e.to_string()))? {
                        out.push(document_to_row(&doc, &mut columns));
                    }
                    out
                }
                ParsedQuery::Count { collection, filter } => {
                    let coll = db.collection::<Document>(&collection);
                    let n = coll
                        .count_documents(filter)
                        .await
                        .map_err(|e| AppError::execution(e.to_string()))?;
                    columns.push("count".to_string());
                    vec![vec![ScalarValue::Int64(n as i64)]]
                }
                ParsedQuery::Distinct { collection, field, filter } => {
                    let coll = db.collection::<Document>(&collection);
                    let values = coll
                        .distinct(field.clone(), filter)
                        .await
                        .map_err(|e| AppError::execution(e.to_string()))?;
                    columns.push(field);
                    values.into_iter().take(max_rows as usize).map(|v| vec![bson_to_scalar(&v)]).collect()
                }
            };
            Ok((columns, rows))
        };

        let (columns, rows) = tokio::time::timeout(
            std::time::Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
            fut,
        )
        .await
        .map_err(|_| AppError::timeout(DEFAULT_CALL_TIMEOUT_MS))??;

        let row_count = rows.len() as u64;
        Ok(QueryResult {
            columns: columns.into_iter().map(|c| (c, "mixed".to_string())).collect(),
            rows,
            row_count,
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
            status: QueryStatus::Success,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn extract_schema(&self, descriptor: &ConnectionDescriptor) -> AppResult<Schema> {
        let client = self.client(descriptor).await?;
        let db = client.database(&descriptor.database);

        let collection_names =
            db.list_collection_names().await.map_err(|e| AppError::extraction(e.to_string()))?;

        let mut tables = Vec::new();
        for name in &collection_names {
            tables.push(self.describe_collection(&db, name, &collection_names).await?);
        }

        Ok(Schema {
            engine: crate::types::EngineKind::Document,
            database_name: descriptor.database.clone(),
            namespaces: BTreeSet::new(),
            tables,
        })
    }

    async fn release(&self, connection_id: &str) {
        self.clients.write().await.remove(connection_id);
    }
}

impl DocumentDriver {
    async fn describe_collection(
        &self,
        db: &mongodb::Database,
        collection: &str,
        all_collections: &[String],
    ) -> AppResult<Table> {
        let coll = db.collection::<Document>(collection);
        let sample = coll.find_one(Document::new()).await.map_err(|e| AppError::extraction(e.to_string()))?;

        let mut fields: Vec<(String, String)> = Vec::new();
        if let Some(doc) = &sample {
            walk_fields(doc, "", &mut fields);
        }
        for conventional in CONVENTIONAL_FIELDS {
            if !fields.iter().any(|(name, _)| name == conventional) {
                fields.push((conventional.to_string(), "unknown".to_string()));
            }
        }

        let columns: Vec<Column> = fields
            .into_iter()
            .enumerate()
            .map(|(i, (name, type_name))| Column {
                name,
                type_name,
                size: None,
                nullable: true,
                default_value: None,
                comment: None,
                ordinal: i as i32,
            })
            .collect();

        let foreign_keys = infer_relationships(&columns, all_collections, collection);

        Ok(Table {
            namespace: String::new(),
            name: collection.to_string(),
            comment: None,
            columns,
            primary_key: ["_id".to_string()].into_iter().collect(),
            foreign_keys,
            indexes: Vec::new(),
        })
    }
}

fn walk_fields(doc: &Document, prefix: &str, out: &mut Vec<(String, String)>) {
    for (key, value) in doc.iter() {
        let path = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
        match value {
            Bson::Document(nested) => walk_fields(nested, &path, out),
            other => out.push((path, bson_type_name(other))),
        }
    }
}

fn bson_type_name(value: &Bson) -> String {
    match value {
        Bson::Null => "null",
        Bson::Boolean(_) => "bool",
        Bson::Int32(_) | Bson::Int64(_) => "int",
        Bson::Double(_) | Bson::Decimal128(_) => "number",
        Bson::String(_) => "string",
        Bson::ObjectId(_) => "objectId",
        Bson::DateTime(_) => "date",
        Bson::Array(_) => "array",
        Bson::Binary(_) => "binary",
        _ => "mixed",
    }
    .to_string()
}

/// Heuristic relationship inference: a `fooId`/`foo_id`-shaped field maps to
/// a pluralized collection name. Flagged `heuristic: true` because naive
/// pluralization is wrong for irregular plurals (spec.md §9).
fn infer_relationships(columns: &[Column], all_collections: &[String], owning_collection: &str) -> Vec<ForeignKey> {
    let mut out = Vec::new();
    for column in columns {
        let Some(stem) = column.name.strip_suffix("Id").or_else(|| column.name.strip_suffix("_id")) else {
            continue;
        };
        if stem.is_empty() || column.name == "_id" {
            continue;
        }
        let pluralized = format!("{stem}s");
        let target = all_collections
            .iter()
            .find(|c| c.eq_ignore_ascii_case(&pluralized) || c.eq_ignore_ascii_case(stem));
        if let Some(target) = target {
            if target != owning_collection {
                out.push(ForeignKey {
                    column: column.name.clone(),
                    referenced_namespace: None,
                    referenced_table: target.clone(),
                    referenced_column: "_id".to_string(),
                    heuristic: true,
                });
            }
        }
    }
    out
}

impl Default for DocumentDriver {
    fn default() -> Self {
        Self::new()
    }
}
