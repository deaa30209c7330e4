//! ConnectionRegistry (C1) — resolves `(userId, connectionId)` to a
//! `ConnectionDescriptor`, gating all access by ownership.
//!
//! Grounded on the teacher's `SessionManager`: a single `RwLock<HashMap<..>>`
//! as the source of truth, safe to call from any request task.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};
use crate::types::ConnectionDescriptor;

struct Entry {
    descriptor: ConnectionDescriptor,
    last_used: DateTime<Utc>,
}

/// In-memory, process-lifetime registry of active connection descriptors.
/// Registration and removal are the external collaborator's responsibility
/// (out of scope per spec.md §1) — this type only resolves and gates access.
pub struct ConnectionRegistry {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self { entries: Arc::new(RwLock::new(HashMap::new())) }
    }

    fn key(connection_id: &str) -> String {
        connection_id.to_string()
    }

    pub async fn register(&self, descriptor: ConnectionDescriptor) {
        let key = Self::key(&descriptor.connection_id);
        let mut entries = self.entries.write().await;
        entries.insert(key, Entry { descriptor, last_used: Utc::now() });
    }

    pub async fn deactivate(&self, connection_id: &str) {
        let mut entries = self.entries.write().await;
        entries.remove(&Self::key(connection_id));
    }

    /// Resolves a descriptor, failing with `NotFound` both when the
    /// connection does not exist and when it exists but is owned by a
    /// different user — the caller must not be able to distinguish the two.
    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, user_id: &str, connection_id: &str) -> AppResult<ConnectionDescriptor> {
        {
            let entries = self.entries.read().await;
            match entries.get(&Self::key(connection_id)) {
                Some(entry) if entry.descriptor.user_id == user_id => {
                    let descriptor = entry.descriptor.clone();
                    drop(entries);
                    let mut entries = self.entries.write().await;
                    if let Some(entry) = entries.get_mut(&Self::key(connection_id)) {
                        entry.last_used = Utc::now();
                    }
                    return Ok(descriptor);
                }
                _ => {}
            }
        }
        tracing::debug!(connection_id, "connection not resolvable for this user");
        Err(AppError::not_found(format!("no connection '{}' for this user", connection_id)))
    }

    pub async fn exists(&self, connection_id: &str) -> bool {
        self.entries.read().await.contains_key(&Self::key(connection_id))
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::Sensitive;
    use crate::types::{Credentials, EngineKind};
    use std::collections::HashMap as StdHashMap;

    fn descriptor(user_id: &str, connection_id: &str) -> ConnectionDescriptor {
        ConnectionDescriptor {
            user_id: user_id.to_string(),
            connection_id: connection_id.to_string(),
            engine: EngineKind::RelationalA,
            host: "localhost".to_string(),
            port: 5432,
            database: "pizza_shop".to_string(),
            credentials: Credentials {
                username: "u".to_string(),
                password: Sensitive::new("p".to_string()),
            },
            properties: StdHashMap::new(),
        }
    }

    #[tokio::test]
    async fn resolves_owned_connection() {
        let registry = ConnectionRegistry::new();
        registry.register(descriptor("alice", "c1")).await;

        let resolved = registry.resolve("alice", "c1").await.unwrap();
        assert_eq!(resolved.connection_id, "c1");
    }

    #[tokio::test]
    async fn cross_user_resolution_is_not_found() {
        let registry = ConnectionRegistry::new();
        registry.register(descriptor("alice", "c1")).await;

        let err = registry.resolve("bob", "c1").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn deactivated_connection_is_not_found() {
        let registry = ConnectionRegistry::new();
        registry.register(descriptor("alice", "c1")).await;
        registry.deactivate("c1").await;

        assert!(registry.resolve("alice", "c1").await.is_err());
    }
}
