//! VectorIndex (C5) — a remote-RPC similarity search client over `reqwest`,
//! generalizing the teacher's `ai/provider.rs` HTTP-call shape to a JSON
//! request/response collaborator instead of an SSE stream.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::VectorConfig;
use crate::error::AppResult;
use crate::types::{SchemaEmbedding, EMBEDDING_DIM};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    pub embedding: SchemaEmbedding,
    pub score: f32,
}

pub struct VectorIndex {
    http: reqwest::Client,
    config: VectorConfig,
    degraded: AtomicBool,
}

impl VectorIndex {
    pub fn new(config: VectorConfig) -> Self {
        let degraded = AtomicBool::new(config.endpoint.is_empty());
        Self { http: reqwest::Client::new(), config, degraded }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn mark_degraded(&self, reason: impl std::fmt::Display) {
        tracing::warn!(%reason, "vector store unavailable, operating in degraded mode");
        self.degraded.store(true, Ordering::Relaxed);
    }

    #[tracing::instrument(skip(self, embeddings))]
    pub async fn upsert(&self, embeddings: &[SchemaEmbedding]) -> AppResult<()> {
        if self.is_degraded() {
            return Ok(());
        }
        let body = json!({"collection": self.config.collection, "points": embeddings});
        let result = self
            .http
            .post(format!("{}/points/upsert", self.config.endpoint))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await;

        match result {
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

    /// Cosine similarity search, filtered by connection id post-ranking with
    /// a 2× over-fetch (spec.md §4.5).
    #[tracing::instrument(skip(self, query_vector))]
    pub async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
        filter_connection_id: Option<&str>,
    ) -> AppResult<Vec<VectorHit>> {
        if self.is_degraded() {
            return Ok(Vec::new());
        }
        debug_assert_eq!(query_vector.len(), EMBEDDING_DIM);

        let over_fetch = limit.saturating_mul(2).max(limit);
        let body = json!({
            "collection": self.config.collection,
            "vector": query_vector,
            "limit": over_fetch,
        });

        let result = self
            .http
            .post(format!("{}/points/search", self.config.endpoint))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await;

        let response = match result {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                self.mark_degraded(resp.status());
                return Ok(Vec::new());
            }
            Err(e) => {
                self.mark_degraded(&e);
                return Ok(Vec::new());
            }
        };

        let mut hits: Vec<VectorHit> = response.json().await.unwrap_or_default();
        if let Some(connection_id) = filter_connection_id {
            hits.retain(|h| h.embedding.connection_id == connection_id);
        }
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_by_connection(&self, connection_id: &str, user_id: &str) -> AppResult<()> {
        if self.is_degraded() {
            return Ok(());
        }
        let body = json!({"collection": self.config.collection, "connectionId": connection_id, "userId": user_id});
        let result = self
            .http
            .post(format!("{}/points/delete", self.config.endpoint))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await;

        match result {
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

    #[test]
    fn empty_endpoint_starts_degraded() {
        let index = VectorIndex::new(VectorConfig { endpoint: String::new(), api_key: String::new(), collection: "c".to_string() });
        assert!(index.is_degraded());
    }

    #[tokio::test]
    async fn degraded_search_returns_empty() {
        let index = VectorIndex::new(VectorConfig { endpoint: String::new(), api_key: String::new(), collection: "c".to_string() });
        let hits = index.search(&[0.0; EMBEDDING_DIM], 5, None).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn degraded_upsert_and_delete_succeed() {
        let index = VectorIndex::new(VectorConfig { endpoint: String::new(), api_key: String::new(), collection: "c".to_string() });
        assert!(index.upsert(&[]).await.is_ok());
        assert!(index.delete_by_connection("c1", "u1").await.is_ok());
    }
}
