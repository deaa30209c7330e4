//! LLMClient (C9) — a single non-streaming chat-completion call plus a
//! bounded per-user memory window. Grounded on the teacher's `ai/provider.rs`
//! `OpenAiProvider`, stripped of streaming/SSE parsing since the pipeline
//! never surfaces partial results.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::Mutex;

use crate::config::LlmConfig;
use crate::error::{AppError, AppResult};
use crate::types::{EngineKind, GeneratedQuery, PromptContext};

const MAX_MEMORY_TURNS: usize = 10;

const QUERY_SYSTEM_PROMPT: &str = "You translate a user's natural-language request into a single \
query for the target database engine. Emit only statements of the target engine. Use \
schema-qualified identifiers from the provided context verbatim. Emit literal values, never \
parameter placeholders. Respond with the query on the first lines, then a blank line, then a \
short explanation.";

const DOCUMENT_QUERY_SYSTEM_PROMPT: &str = "You translate a user's natural-language request into a \
single MongoDB command as a JSON object, standard command shape: the value of the one operator key \
is the collection name, e.g. {\"find\": \"orders\", \"filter\": {...}, \"limit\": 20}, \
{\"aggregate\": \"orders\", \"pipeline\": [...]}, {\"count\": \"orders\", \"filter\": {...}}, or \
{\"distinct\": \"orders\", \"field\": \"status\", \"filter\": {...}}. Emit exactly one of find, \
aggregate, count, distinct — never a separate top-level 'collection' field. Emit literal values, \
never parameter placeholders. Respond with the JSON object on the first lines, then a blank line, \
then a short explanation.";

const CHAT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant embedded in a database tool. Answer conversationally.";

const CLASSIFY_SYSTEM_PROMPT: &str =
    "Answer with exactly one word, true or false: does the following user message ask to \
retrieve or query data, as opposed to a general conversational message?";

#[derive(Debug, Clone)]
struct Turn {
    user: String,
    assistant: String,
}

/// Per-user bounded conversational memory, keyed by user id (spec.md §4.7,
/// §9 — process-wide, not per-request, empty on startup).
#[derive(Default)]
struct MemoryStore {
    turns: HashMap<String, Vec<Turn>>,
}

impl MemoryStore {
    fn push(&mut self, key: &str, user: String, assistant: String) {
        let entry = self.turns.entry(key.to_string()).or_default();
        entry.push(Turn { user, assistant });
        if entry.len() > MAX_MEMORY_TURNS {
            entry.remove(0);
        }
    }

    fn render(&self, key: &str) -> Vec<serde_json::Value> {
        self.turns
            .get(key)
            .map(|turns| {
                turns
                    .iter()
                    .flat_map(|t| {
                        vec![
                            json!({"role": "user", "content": t.user}),
                            json!({"role": "assistant", "content": t.assistant}),
                        ]
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub struct LlmClient {
    http: reqwest::Client,
    config: LlmConfig,
    memory: Arc<Mutex<MemoryStore>>,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self { http: reqwest::Client::new(), config, memory: Arc::new(Mutex::new(MemoryStore::default())) }
    }

    async fn complete(&self, system_prompt: &str, user_prompt: &str, memory_key: &str) -> AppResult<String> {
        let prior = self.memory.lock().await.render(memory_key);
        let mut messages = vec![json!({"role": "system", "content": system_prompt})];
        messages.extend(prior);
        messages.push(json!({"role": "user", "content": user_prompt}));

        let body = json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
        });

        let fut = self
            .http
            .post(&self.config.endpoint)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send();

        let response = tokio::time::timeout(std::time::Duration::from_millis(self.config.timeout_ms), fut)
            .await
            .map_err(|_| AppError::timeout(self.config.timeout_ms))?
            .map_err(|e| AppError::llm(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let message = extract_api_error(&text).unwrap_or_else(|| format!("HTTP {}: {}", status, text));
            return Err(AppError::llm(message));
        }

        let parsed: serde_json::Value = response.json().await.map_err(|e| AppError::llm(e.to_string()))?;
        let text = parsed["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AppError::llm("response had no message content"))?
            .to_string();

        self.memory.lock().await.push(memory_key, user_prompt.to_string(), text.clone());
        Ok(text)
    }

    #[tracing::instrument(skip(self, context))]
    pub async fn generate_query(
        &self,
        user_query: &str,
        engine: EngineKind,
        context: &PromptContext,
        memory_key: &str,
    ) -> AppResult<GeneratedQuery> {
        let user_prompt = format!(
            "Target engine: {:?}\n\nSchema context:\n{}\n\nJoin hints:\n{}\n\nUser request: {}",
            engine,
            context.ranked_tables.iter().map(|(_, _, text)| text.clone()).collect::<Vec<_>>().join("\n"),
            context.join_hints.join("\n"),
            user_query,
        );
        let system_prompt = match engine {
            EngineKind::Document => DOCUMENT_QUERY_SYSTEM_PROMPT,
            EngineKind::RelationalA | EngineKind::RelationalB => QUERY_SYSTEM_PROMPT,
        };
        let response = self.complete(system_prompt, &user_prompt, memory_key).await?;
        let (text, explanation) = parse_query_response(&response);
        if text.trim().is_empty() {
            return Err(AppError::llm("model returned no query text"));
        }
        Ok(GeneratedQuery { engine, text, explanation })
    }

    #[tracing::instrument(skip(self))]
    pub async fn chat(&self, user_query: &str, memory_key: &str) -> AppResult<String> {
        self.complete(CHAT_SYSTEM_PROMPT, user_query, memory_key).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn is_query_request(&self, user_query: &str) -> AppResult<bool> {
        // Classification turns are not conversational history worth remembering.
        let scratch_key = format!("__classify__{}", user_query.len());
        let response = self.complete(CLASSIFY_SYSTEM_PROMPT, user_query, &scratch_key).await?;
        self.memory.lock().await.turns.remove(&scratch_key);
        Ok(response.trim().to_ascii_lowercase().starts_with("true"))
    }
}

/// Two-stage parse (spec.md §4.9, §9): fenced code block first, falling
/// back to the first paragraph as the query and the rest as explanation.
fn parse_query_response(response: &str) -> (String, String) {
    if let Some(query) = extract_query_from_response(response) {
        let explanation = response
            .rfind("```")
            .map(|end| response[end + 3..].trim())
            .filter(|s| !s.is_empty())
            .unwrap_or("")
            .to_string();
        return (query, explanation);
    }

    match response.split_once("\n\n") {
        Some((first, rest)) => (first.trim().to_string(), rest.trim().to_string()),
        None => (response.trim().to_string(), String::new()),
    }
}

fn extract_query_from_response(response: &str) -> Option<String> {
    let fence_tags = ["```sql", "```mysql", "```postgresql", "```json", "```mongo", "```"];
    for tag in fence_tags {
        if let Some(start) = response.find(tag) {
            let content_start = start + tag.len();
            let content_start =
                response[content_start..].find('\n').map(|i| content_start + i + 1).unwrap_or(content_start);
            if let Some(end) = response[content_start..].find("```") {
                let query = response[content_start..content_start + end].trim();
                if !query.is_empty() {
                    return Some(query.to_string());
                }
            }
        }
    }
    None
}

fn extract_api_error(body: &str) -> Option<String> {
    let parsed: serde_json::Value = serde_json::from_str(body).ok()?;
    parsed["error"]["message"].as_str().map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_sql_block_is_extracted() {
        let response = "```sql\nSELECT * FROM pizza_shop.customer\n```\n\nLists all customers.";
        let (text, explanation) = parse_query_response(response);
        assert_eq!(text, "SELECT * FROM pizza_shop.customer");
        assert_eq!(explanation, "Lists all customers.");
    }

    #[test]
    fn untagged_paragraph_falls_back() {
        let response = "SELECT 1\n\nA trivial query.";
        let (text, explanation) = parse_query_response(response);
        assert_eq!(text, "SELECT 1");
        assert_eq!(explanation, "A trivial query.");
    }

    #[test]
    fn memory_window_caps_at_ten_turns() {
        let mut store = MemoryStore::default();
        for i in 0..15 {
            store.push("alice", format!("q{i}"), format!("a{i}"));
        }
        assert_eq!(store.turns["alice"].len(), MAX_MEMORY_TURNS);
        assert_eq!(store.turns["alice"][0].user, "q5");
    }
}
