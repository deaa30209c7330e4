//! Unified error type for the orchestration core.
//!
//! All component-level errors are mapped to these kinds so the Orchestrator
//! can decide, in one place, what is recovered locally versus surfaced to
//! the caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Serialize, Deserialize, Clone)]
pub enum AppError {
    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("language model error: {message}")]
    LLMError { message: String },

    #[error("schema extraction error: {message}")]
    ExtractionError { message: String },

    #[error("vector store unavailable: {message}")]
    VectorStoreUnavailable { message: String },

    #[error("graph store unavailable: {message}")]
    GraphStoreUnavailable { message: String },

    #[error("execution error: {message}")]
    ExecutionError { message: String },

    #[error("blocked: {reason}")]
    Blocked { text: String, reason: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound { message: msg.into() }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized { message: msg.into() }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput { message: msg.into() }
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    pub fn llm(msg: impl Into<String>) -> Self {
        Self::LLMError { message: msg.into() }
    }

    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::ExtractionError { message: msg.into() }
    }

    pub fn vector_unavailable(msg: impl Into<String>) -> Self {
        Self::VectorStoreUnavailable { message: msg.into() }
    }

    pub fn graph_unavailable(msg: impl Into<String>) -> Self {
        Self::GraphStoreUnavailable { message: msg.into() }
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::ExecutionError { message: msg.into() }
    }

    pub fn blocked(text: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Blocked { text: text.into(), reason: reason.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal { message: msg.into() }
    }

    /// Short kind tag surfaced to callers, never the full Debug/Display form
    /// (which may embed a sanitized query but never credentials).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NotFound",
            Self::Unauthorized { .. } => "Unauthorized",
            Self::InvalidInput { .. } => "InvalidInput",
            Self::Timeout { .. } => "Timeout",
            Self::LLMError { .. } => "LLMError",
            Self::ExtractionError { .. } => "ExtractionError",
            Self::VectorStoreUnavailable { .. } => "VectorStoreUnavailable",
            Self::GraphStoreUnavailable { .. } => "GraphStoreUnavailable",
            Self::ExecutionError { .. } => "ExecutionError",
            Self::Blocked { .. } => "Blocked",
            Self::Internal { .. } => "Internal",
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
