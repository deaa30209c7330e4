//! Process configuration, loaded once from recognized environment keys (§6).
//! Unrecognized keys are ignored rather than treated as errors.

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct VectorConfig {
    pub endpoint: String,
    pub api_key: String,
    pub collection: String,
}

#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: String,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub request_timeout_ms: u64,
    pub top_k: usize,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub vector: VectorConfig,
    pub graph: GraphConfig,
    pub orchestrator: OrchestratorConfig,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u64_or(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32_or(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f32_or(key: &str, default: f32) -> f32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize_or(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    /// Loads configuration from the process environment, applying the
    /// documented defaults for every optional key.
    pub fn from_env() -> Self {
        Self {
            llm: LlmConfig {
                endpoint: env_or("llm.endpoint", ""),
                api_key: env_or("llm.api_key", ""),
                model: env_or("llm.model", "gpt-4o-mini"),
                temperature: env_f32_or("llm.temperature", 0.7),
                max_tokens: env_u32_or("llm.max_tokens", 1000),
                timeout_ms: env_u64_or("llm.timeout_ms", 30_000),
            },
            vector: VectorConfig {
                endpoint: env_or("vector.endpoint", ""),
                api_key: env_or("vector.api_key", ""),
                collection: env_or("vector.collection", "dbvybe_schemas"),
            },
            graph: GraphConfig {
                uri: env_or("graph.uri", ""),
                user: env_or("graph.user", ""),
                password: env_or("graph.password", ""),
                database: env_or("graph.database", ""),
            },
            orchestrator: OrchestratorConfig {
                request_timeout_ms: env_u64_or("orchestrator.request_timeout_ms", 45_000),
                top_k: env_usize_or("orchestrator.top_k", 8),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        // SAFETY: single-threaded test, no other test mutates these keys.
        for key in [
            "llm.endpoint",
            "llm.api_key",
            "llm.model",
            "llm.temperature",
            "llm.max_tokens",
            "llm.timeout_ms",
            "vector.endpoint",
            "vector.collection",
            "orchestrator.request_timeout_ms",
            "orchestrator.top_k",
        ] {
            std::env::remove_var(key);
        }

        let cfg = Config::from_env();
        assert_eq!(cfg.llm.temperature, 0.7);
        assert_eq!(cfg.llm.max_tokens, 1000);
        assert_eq!(cfg.llm.timeout_ms, 30_000);
        assert_eq!(cfg.vector.collection, "dbvybe_schemas");
        assert_eq!(cfg.orchestrator.request_timeout_ms, 45_000);
        assert_eq!(cfg.orchestrator.top_k, 8);
    }
}
