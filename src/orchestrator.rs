//! Orchestrator (C11) — drives the full request pipeline, owns the overall
//! deadline and concurrency, and maps every failure mode to a `Response`
//! (spec.md §4.11).

use std::sync::Arc;
use std::time::Duration;

use crate::cache::KnowledgeCache;
use crate::classifier::{Intent, QueryClassifier};
use crate::config::Config;
use crate::context::ContextAssembler;
use crate::embedding::embed_text;
use crate::engine::{self, EngineDriver};
use crate::error::{AppError, AppResult};
use crate::graph::GraphIndex;
use crate::llm::LlmClient;
use crate::registry::ConnectionRegistry;
use crate::sanitizer;
use crate::schema::SchemaExtractor;
use crate::types::{EngineKind, Response};
use crate::vector::VectorIndex;

/// Row cap applied to every execution; also the `$limit` appended to
/// document aggregate pipelines that declare none (spec.md §8 scenario 4).
const DEFAULT_MAX_ROWS: u32 = 100;

pub struct Orchestrator {
    registry: ConnectionRegistry,
    cache: KnowledgeCache,
    vector: VectorIndex,
    graph: GraphIndex,
    llm: LlmClient,
    context_assembler: ContextAssembler,
    request_timeout_ms: u64,
}

impl Orchestrator {
    pub fn new(config: Config, registry: ConnectionRegistry, cache: KnowledgeCache) -> Self {
        Self {
            registry,
            cache,
            vector: VectorIndex::new(config.vector),
            graph: GraphIndex::new(config.graph),
            llm: LlmClient::new(config.llm),
            context_assembler: ContextAssembler::new(config.orchestrator.top_k),
            request_timeout_ms: config.orchestrator.request_timeout_ms,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &KnowledgeCache {
        &self.cache
    }

    pub fn vector(&self) -> &VectorIndex {
        &self.vector
    }

    pub fn graph(&self) -> &GraphIndex {
        &self.graph
    }

    /// Extracts the schema for a newly registered connection and populates
    /// the cache, vector index, and graph store from it (spec.md §3:
    /// SchemaEmbedding is "created on registration, replaced on re-analysis").
    #[tracing::instrument(skip(self))]
    pub async fn provision_connection(&self, descriptor: &crate::types::ConnectionDescriptor) -> AppResult<()> {
        let driver = engine::driver_for(descriptor.engine);
        let extractor = SchemaExtractor::new(driver);
        let schema = extractor.extract(descriptor).await?;

        let embeddings: Vec<crate::types::SchemaEmbedding> = schema
            .tables
            .iter()
            .map(|table| crate::types::SchemaEmbedding {
                id: uuid::Uuid::new_v4(),
                connection_id: descriptor.connection_id.clone(),
                user_id: descriptor.user_id.clone(),
                table_id: table.id(),
                text: crate::schema::render::render_table(table),
                vector: embed_text(&crate::schema::render::render_table(table)),
                created_at: chrono::Utc::now(),
            })
            .collect();

        let relationships: Vec<(String, crate::types::ForeignKey)> = schema
            .tables
            .iter()
            .flat_map(|t| t.foreign_keys.iter().map(move |fk| (t.id(), fk.clone())))
            .collect();

        let (vector_result, graph_result) = tokio::join!(
            self.vector.upsert(&embeddings),
            self.graph.store_relationships(&descriptor.connection_id, &descriptor.user_id, descriptor.engine, &relationships),
        );
        vector_result?;
        graph_result?;

        self.cache.put(&descriptor.connection_id, schema).await;
        Ok(())
    }

    #[tracing::instrument(skip(self, user_query))]
    pub async fn handle(&self, user_id: &str, connection_id: &str, user_query: &str, _session_id: &str) -> Response {
        let deadline = Duration::from_millis(self.request_timeout_ms);
        match tokio::time::timeout(deadline, self.handle_inner(user_id, connection_id, user_query)).await {
            Ok(response) => response,
            Err(_) => to_response(AppError::timeout(self.request_timeout_ms)),
        }
    }

    async fn handle_inner(&self, user_id: &str, connection_id: &str, user_query: &str) -> Response {
        if user_query.trim().is_empty() {
            return to_response(AppError::invalid_input("empty request text"));
        }

        // RESOLVE
        let descriptor = match self.registry.resolve(user_id, connection_id).await {
            Ok(d) => d,
            Err(e) => return to_response(e),
        };

        let driver = engine::driver_for(descriptor.engine);

        // CLASSIFY (failure degrades to GENERAL, per §4.11)
        let classifier = QueryClassifier::new(&self.cache, &self.llm);
        let intent = classifier.classify(user_query, connection_id).await;

        match intent {
            Intent::Knowledge => self.answer_from_cache(connection_id).await,
            Intent::General => match self.llm.chat(user_query, user_id).await {
                Ok(text) => Response::Chat { text },
                Err(e) => to_response(e),
            },
            Intent::Query => self.handle_query(user_id, &descriptor, driver, user_query).await,
        }
    }

    async fn answer_from_cache(&self, connection_id: &str) -> Response {
        match self.cache.get(connection_id).await {
            Some(schema) => {
                let mut ids: Vec<String> = schema.tables.iter().map(|t| t.id()).collect();
                ids.sort();
                let text = if ids.is_empty() {
                    "This database has no known tables yet.".to_string()
                } else {
                    format!("This database has the following tables: {}.", ids.join(", "))
                };
                Response::KnowledgeAnswer { text }
            }
            None => Response::KnowledgeAnswer { text: "No schema is cached for this connection yet.".to_string() },
        }
    }

    async fn handle_query(
        &self,
        user_id: &str,
        descriptor: &crate::types::ConnectionDescriptor,
        driver: Arc<dyn EngineDriver>,
        user_query: &str,
    ) -> Response {
        // GATHER_CONTEXT: schema lookup and vector search run concurrently;
        // missing/degraded results degrade to empty context rather than failure.
        let extractor = SchemaExtractor::new(driver.clone());
        let schema_fut = self.cache.get_or_extract(&descriptor.connection_id, || extractor.extract(descriptor));
        let query_vector = embed_text(user_query);
        let vector_fut = self.vector.search(&query_vector, 16, Some(&descriptor.connection_id));

        let (schema_result, vector_result) = tokio::join!(schema_fut, vector_fut);

        let schema = schema_result.ok();
        let vector_hits = vector_result.unwrap_or_default();

        let seed_table = schema.as_ref().and_then(|s| s.tables.first()).map(|t| t.id());
        let graph_slice = match seed_table {
            Some(table_id) => self.graph.neighborhood(&descriptor.connection_id, &table_id, 2).await.unwrap_or_default(),
            None => Vec::new(),
        };

        let context =
            self.context_assembler.assemble(user_id, descriptor, schema.as_deref(), &vector_hits, &graph_slice);

        // GENERATE
        let generated = match self.llm.generate_query(user_query, descriptor.engine, &context, user_id).await {
            Ok(g) => g,
            Err(e) => return to_response(e),
        };

        // SANITIZE
        let empty_schema;
        let schema_ref = match &schema {
            Some(s) => s.as_ref(),
            None => {
                empty_schema = empty_schema_for(descriptor.engine, &descriptor.database);
                &empty_schema
            }
        };
        let sanitized = match sanitizer::sanitize(&generated, schema_ref) {
            Ok(s) => s,
            Err(AppError::Blocked { text, reason }) => return Response::Blocked { text, reason },
            Err(e) => return to_response(e),
        };

        // EXECUTE
        match driver.execute(descriptor, &sanitized.text, DEFAULT_MAX_ROWS).await {
            Ok(result) => Response::Query { text: sanitized.text, explanation: sanitized.explanation, result },
            Err(e) => Response::Error {
                kind: e.kind().to_string(),
                message: format!("{e} (query: {})", sanitized.text),
            },
        }
    }
}

fn empty_schema_for(engine: EngineKind, database_name: &str) -> crate::types::Schema {
    crate::types::Schema {
        engine,
        database_name: database_name.to_string(),
        namespaces: Default::default(),
        tables: Vec::new(),
    }
}

fn to_response(err: AppError) -> Response {
    match err {
        AppError::Blocked { text, reason } => Response::Blocked { text, reason },
        other => Response::Error { kind: other.kind().to_string(), message: other.to_string() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::Sensitive;
    use crate::types::{ConnectionDescriptor, Credentials};
    use std::collections::HashMap;

    fn test_config() -> Config {
        let mut cfg = Config::from_env();
        cfg.llm.endpoint = "http://127.0.0.1:1/unreachable".to_string();
        cfg.vector.endpoint = String::new();
        cfg.graph.uri = String::new();
        cfg.orchestrator.request_timeout_ms = 2_000;
        cfg
    }

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor {
            user_id: "alice".to_string(),
            connection_id: "c1".to_string(),
            engine: EngineKind::RelationalA,
            host: "localhost".to_string(),
            port: 5432,
            database: "pizza_shop".to_string(),
            credentials: Credentials { username: "u".to_string(), password: Sensitive::new("p".to_string()) },
            properties: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn empty_text_is_invalid_input() {
        let orchestrator = Orchestrator::new(test_config(), ConnectionRegistry::new(), KnowledgeCache::new());
        orchestrator.registry().register(descriptor()).await;

        let response = orchestrator.handle("alice", "c1", "   ", "s1").await;
        match response {
            Response::Error { kind, .. } => assert_eq!(kind, "InvalidInput"),
            _ => panic!("expected Error"),
        }
    }

    #[tokio::test]
    async fn cross_user_is_not_found() {
        let orchestrator = Orchestrator::new(test_config(), ConnectionRegistry::new(), KnowledgeCache::new());
        orchestrator.registry().register(descriptor()).await;

        let response = orchestrator.handle("bob", "c1", "which tables does this have?", "s1").await;
        match response {
            Response::Error { kind, .. } => assert_eq!(kind, "NotFound"),
            _ => panic!("expected Error"),
        }
    }

    #[tokio::test]
    async fn knowledge_answer_lists_cached_tables_in_order() {
        let orchestrator = Orchestrator::new(test_config(), ConnectionRegistry::new(), KnowledgeCache::new());
        orchestrator.registry().register(descriptor()).await;
        orchestrator
            .cache()
            .put(
                "c1",
                crate::types::Schema {
                    engine: EngineKind::RelationalA,
                    database_name: "pizza_shop".to_string(),
                    namespaces: Default::default(),
                    tables: vec![
                        crate::types::Table {
                            namespace: "pizza_shop".to_string(),
                            name: "order".to_string(),
                            comment: None,
                            columns: Vec::new(),
                            primary_key: Default::default(),
                            foreign_keys: Vec::new(),
                            indexes: Vec::new(),
                        },
                        crate::types::Table {
                            namespace: "pizza_shop".to_string(),
                            name: "customer".to_string(),
                            comment: None,
                            columns: Vec::new(),
                            primary_key: Default::default(),
                            foreign_keys: Vec::new(),
                            indexes: Vec::new(),
                        },
                    ],
                },
            )
            .await;

        let response = orchestrator.handle("alice", "c1", "which tables does this database have?", "s1").await;
        match response {
            Response::KnowledgeAnswer { text } => {
                let customer_idx = text.find("pizza_shop.customer").unwrap();
                let order_idx = text.find("pizza_shop.order").unwrap();
                assert!(customer_idx < order_idx);
            }
            other => panic!("expected KnowledgeAnswer, got {other:?}"),
        }
    }
}
