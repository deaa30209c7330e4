//! dbvybe-core: the NL-to-query orchestration pipeline for a natural
//! language database assistant. Everything below this crate root is a
//! transport-agnostic library; HTTP routing, auth, and account persistence
//! are external collaborators this crate never owns.

pub mod cache;
pub mod classifier;
pub mod config;
pub mod context;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod graph;
pub mod llm;
pub mod observability;
pub mod orchestrator;
pub mod registry;
pub mod sanitizer;
pub mod schema;
pub mod types;
pub mod vector;

pub use cache::KnowledgeCache;
pub use config::Config;
pub use error::{AppError, AppResult};
pub use orchestrator::Orchestrator;
pub use registry::ConnectionRegistry;
pub use types::{ConnectionDescriptor, Response};

/// Wires every stateful component together from process configuration,
/// mirroring the teacher's `AppState::new()` composition root.
pub struct Core {
    pub orchestrator: Orchestrator,
}

impl Core {
    pub fn new(config: Config) -> Self {
        let orchestrator = Orchestrator::new(config, ConnectionRegistry::new(), KnowledgeCache::new());
        Self { orchestrator }
    }

    pub async fn register_connection(&self, descriptor: ConnectionDescriptor) -> AppResult<()> {
        self.orchestrator.registry().register(descriptor.clone()).await;
        self.orchestrator.provision_connection(&descriptor).await
    }

    /// Per spec.md §5: both store deletes must complete before the cache
    /// entry is dropped, tolerating stale index entries over a leaked Schema.
    pub async fn remove_connection(&self, user_id: &str, connection_id: &str) {
        let (vector_result, graph_result) = tokio::join!(
            self.orchestrator.vector().delete_by_connection(connection_id, user_id),
            self.orchestrator.graph().delete_by_connection(connection_id, user_id),
        );
        if vector_result.is_ok() && graph_result.is_ok() {
            self.orchestrator.registry().deactivate(connection_id).await;
            self.orchestrator.cache().drop_connection(connection_id).await;
        } else {
            tracing::warn!("store delete failed for connection {connection_id}, leaving cache intact for retry");
        }
    }

    pub async fn ask(&self, user_id: &str, connection_id: &str, text: &str, session_id: &str) -> Response {
        self.orchestrator.handle(user_id, connection_id, text, session_id).await
    }
}
