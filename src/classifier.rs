//! QueryClassifier (C8) — three-tier decision per spec.md §4.8: a
//! knowledge predicate, then a fixed query-intent keyword set, then an
//! LLM true/false fallback that defaults to GENERAL on failure.

use crate::cache::KnowledgeCache;
use crate::llm::LlmClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Knowledge,
    General,
    Query,
}

const SCHEMA_WORDS: &[&str] = &["table", "tables", "column", "columns", "schema", "relationship", "relationships", "database"];

const QUERY_KEYWORDS: &[&str] = &[
    "select", "insert", "update", "delete", "create", "drop", "alter", "show", "describe",
    "explain", "find", "aggregate", "count", "sum", "avg", "group by", "order by", "where",
    "from", "join", "database", "table", "column", "record", "data", "query", "search",
    "filter", "sort",
];

pub struct QueryClassifier<'a> {
    cache: &'a KnowledgeCache,
    llm: &'a LlmClient,
}

impl<'a> QueryClassifier<'a> {
    pub fn new(cache: &'a KnowledgeCache, llm: &'a LlmClient) -> Self {
        Self { cache, llm }
    }

    #[tracing::instrument(skip(self))]
    pub async fn classify(&self, user_query: &str, connection_id: &str) -> Intent {
        let lower = user_query.to_ascii_lowercase();

        let mentions_schema = SCHEMA_WORDS.iter().any(|w| lower.contains(w));
        if mentions_schema && self.cache.get(connection_id).await.is_some() {
            return Intent::Knowledge;
        }

        if QUERY_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            return Intent::Query;
        }

        match self.llm.is_query_request(user_query).await {
            Ok(true) => Intent::Query,
            Ok(false) => Intent::General,
            Err(_) => Intent::General,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;
    use crate::types::{EngineKind, Schema};
    use std::collections::BTreeSet;

    fn llm_client() -> LlmClient {
        LlmClient::new(LlmConfig {
            endpoint: "http://127.0.0.1:1/unreachable".to_string(),
            api_key: String::new(),
            model: "test".to_string(),
            temperature: 0.0,
            max_tokens: 10,
            timeout_ms: 50,
        })
    }

    #[tokio::test]
    async fn knowledge_query_with_cached_schema_is_knowledge() {
        let cache = KnowledgeCache::new();
        cache
            .put(
                "c1",
                Schema { engine: EngineKind::RelationalA, database_name: "d".to_string(), namespaces: BTreeSet::new(), tables: Vec::new() },
            )
            .await;
        let llm = llm_client();
        let classifier = QueryClassifier::new(&cache, &llm);
        assert_eq!(classifier.classify("which tables does this database have?", "c1").await, Intent::Knowledge);
    }

    #[tokio::test]
    async fn keyword_match_is_query() {
        let cache = KnowledgeCache::new();
        let llm = llm_client();
        let classifier = QueryClassifier::new(&cache, &llm);
        assert_eq!(classifier.classify("list all customers who paid more than $20", "c1").await, Intent::Query);
    }

    #[tokio::test]
    async fn llm_failure_defaults_to_general() {
        let cache = KnowledgeCache::new();
        let llm = llm_client();
        let classifier = QueryClassifier::new(&cache, &llm);
        assert_eq!(classifier.classify("hello there", "c1").await, Intent::General);
    }
}
