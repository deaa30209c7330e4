//! KnowledgeCache (C4) — per-connection Schema snapshots, process-lifetime,
//! no eviction policy. Grounded on the teacher's `SessionManager` RwLock map
//! shape, simplified to a pure get/put/drop cache with coalesced re-extraction.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::types::Schema;

/// Thread-safe `connectionId -> Schema` cache. `get` never synthesizes a
/// missing entry — the Orchestrator decides whether to trigger extraction.
pub struct KnowledgeCache {
    schemas: RwLock<HashMap<String, Arc<Schema>>>,
    /// Single-writer-per-key coalescing: concurrent re-extractions for the
    /// same connection share one in-flight future rather than racing.
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Notify>>>,
}

impl KnowledgeCache {
    pub fn new() -> Self {
        Self { schemas: RwLock::new(HashMap::new()), inflight: Mutex::new(HashMap::new()) }
    }

    pub async fn get(&self, connection_id: &str) -> Option<Arc<Schema>> {
        self.schemas.read().await.get(connection_id).cloned()
    }

    pub async fn put(&self, connection_id: &str, schema: Schema) {
        self.schemas.write().await.insert(connection_id.to_string(), Arc::new(schema));
    }

    pub async fn drop_connection(&self, connection_id: &str) {
        self.schemas.write().await.remove(connection_id);
    }

    /// Runs `extract` for `connection_id` unless another caller is already
    /// doing so, in which case this waits for that caller's result instead
    /// of issuing a second extraction.
    pub async fn get_or_extract<F, Fut, E>(&self, connection_id: &str, extract: F) -> Result<Arc<Schema>, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Schema, E>>,
    {
        if let Some(schema) = self.get(connection_id).await {
            return Ok(schema);
        }

        let mut inflight = self.inflight.lock().await;
        if let Some(existing) = inflight.get(connection_id) {
            let existing = existing.clone();
            // Register interest on the Notify while still holding the
            // inflight lock: the in-flight extractor must take this same
            // lock to call notify_waiters(), so constructing (not yet
            // awaiting) `notified` here happens-before that call and can't
            // miss it, per tokio's Notify coalescing pattern.
            let notified = existing.notified();
            drop(inflight);
            notified.await;
            if let Some(schema) = self.get(connection_id).await {
                return Ok(schema);
            }
        } else {
            inflight.insert(connection_id.to_string(), Arc::new(tokio::sync::Notify::new()));
            drop(inflight);
        }

        let result = extract().await;
        if let Ok(schema) = &result {
            self.put(connection_id, schema.clone()).await;
        }

        let mut inflight = self.inflight.lock().await;
        if let Some(notify) = inflight.remove(connection_id) {
            notify.notify_waiters();
        }

        result.map(|schema| Arc::new(schema)).or_else(|e| {
            // Preserve the error for this caller; any coalesced waiter that
            // found nothing cached will retry extraction itself.
            Err(e)
        })
    }
}

impl Default for KnowledgeCache {
    fn default() -> Self {
        Self::new()
    }
}
