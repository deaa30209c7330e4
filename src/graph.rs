//! GraphIndex (C6) — a remote-RPC property-graph client, same degraded-mode
//! contract and reqwest shape as `VectorIndex` (spec.md §4.6).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::GraphConfig;
use crate::error::AppResult;
use crate::types::{EngineKind, ForeignKey};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Path {
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborhoodEntry {
    pub table_id: String,
    pub distance: u32,
    pub edge_kind: String,
}

pub struct GraphIndex {
    http: reqwest::Client,
    config: GraphConfig,
    degraded: AtomicBool,
}

impl GraphIndex {
    pub fn new(config: GraphConfig) -> Self {
        let degraded = AtomicBool::new(config.uri.is_empty());
        Self { http: reqwest::Client::new(), config, degraded }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn mark_degraded(&self, reason: impl std::fmt::Display) {
        tracing::warn!(%reason, "graph store unavailable, operating in degraded mode");
        self.degraded.store(true, Ordering::Relaxed);
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<reqwest::Response, reqwest::Error> {
        self.http
            .post(format!("{}{}", self.config.uri, path))
            .basic_auth(&self.config.user, Some(&self.config.password))
            .json(&body)
            .send()
            .await
    }

    /// Creates the Database node if absent, merges Table nodes, and
    /// replaces REFERENCES edges for that database. Idempotent on re-store.
    #[tracing::instrument(skip(self, relationships))]
    pub async fn store_relationships(
        &self,
        connection_id: &str,
        user_id: &str,
        engine: EngineKind,
        relationships: &[(String, ForeignKey)],
    ) -> AppResult<()> {
        if self.is_degraded() {
            return Ok(());
        }
        let body = json!({
            "database": self.config.database,
            "connectionId": connection_id,
            "userId": user_id,
            "engine": engine,
            "relationships": relationships,
        });
        match self.post("/relationships/store", body).await {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => {
                self.mark_degraded(resp.status());
                Ok(())
            }
            Err(e) => {
                self.mark_degraded(&e);
                Ok(())
            }
        }
    }

    /// Up to 10 paths ordered by length.
    #[tracing::instrument(skip(self))]
    pub async fn shortest_path(
        &self,
        connection_id: &str,
        src_table: &str,
        dst_table: &str,
        max_depth: u32,
    ) -> AppResult<Vec<Path>> {
        if self.is_degraded() {
            return Ok(Vec::new());
        }
        let body = json!({"connectionId": connection_id, "src": src_table, "dst": dst_table, "maxDepth": max_depth});
        match self.post("/paths/shortest", body).await {
            Ok(resp) if resp.status().is_success() => {
                let mut paths: Vec<Path> = resp.json().await.unwrap_or_default();
                paths.sort_by_key(|p| p.tables.len());
                paths.truncate(10);
                Ok(paths)
            }
            Ok(resp) => {
                self.mark_degraded(resp.status());
                Ok(Vec::new())
            }
            Err(e) => {
                self.mark_degraded(&e);
                Ok(Vec::new())
            }
        }
    }

    /// Deduplicated, ordered by distance then name, capped at 20.
    #[tracing::instrument(skip(self))]
    pub async fn neighborhood(
        &self,
        connection_id: &str,
        table_id: &str,
        max_depth: u32,
    ) -> AppResult<Vec<NeighborhoodEntry>> {
        if self.is_degraded() {
            return Ok(Vec::new());
        }
        let body = json!({"connectionId": connection_id, "tableId": table_id, "maxDepth": max_depth});
        match self.post("/neighborhood", body).await {
            Ok(resp) if resp.status().is_success() => {
                let mut entries: Vec<NeighborhoodEntry> = resp.json().await.unwrap_or_default();
                entries.sort_by(|a, b| a.distance.cmp(&b.distance).then_with(|| a.table_id.cmp(&b.table_id)));
                entries.dedup_by(|a, b| a.table_id == b.table_id);
                entries.truncate(20);
                Ok(entries)
            }
            Ok(resp) => {
                self.mark_degraded(resp.status());
                Ok(Vec::new())
            }
            Err(e) => {
                self.mark_degraded(&e);
                Ok(Vec::new())
            }
        }
    }

    /// Direct outbound references.
    #[tracing::instrument(skip(self))]
    pub async fn dependencies(&self, connection_id: &str, table_ids: &[String]) -> AppResult<HashMap<String, Vec<String>>> {
        if self.is_degraded() {
            return Ok(HashMap::new());
        }
        let body = json!({"connectionId": connection_id, "tableIds": table_ids});
        match self.post("/dependencies", body).await {
            Ok(resp) if resp.status().is_success() => Ok(resp.json().await.unwrap_or_default()),
            Ok(resp) => {
                self.mark_degraded(resp.status());
                Ok(HashMap::new())
            }
            Err(e) => {
                self.mark_degraded(&e);
                Ok(HashMap::new())
            }
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_by_connection(&self, connection_id: &str, user_id: &str) -> AppResult<()> {
        if self.is_degraded() {
            return Ok(());
        }
        let body = json!({"connectionId": connection_id, "userId": user_id});
        match self.post("/connections/delete", body).await {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => {
                self.mark_degraded(resp.status());
                Ok(())
            }
            Err(e) => {
                self.mark_degraded(&e);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GraphConfig {
        GraphConfig { uri: String::new(), user: String::new(), password: String::new(), database: String::new() }
    }

    #[test]
    fn empty_uri_starts_degraded() {
        assert!(GraphIndex::new(config()).is_degraded());
    }

    #[tokio::test]
    async fn degraded_neighborhood_is_empty() {
        let graph = GraphIndex::new(config());
        assert!(graph.neighborhood("c1", "pizza_shop.customer", 2).await.unwrap().is_empty());
    }
}
