//! Reasoning backend traits and types
//!
//! A backend takes an ordered list of chat messages and returns one text
//! completion. Authentication and rate-limit failures are kept distinct from
//! content errors so the debug loop can decide whether to keep going.

use async_trait::async_trait;
use sa_core::ReasoningEffort;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Provider types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    OpenAI,
    Ollama,
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderType::OpenAI => write!(f, "openai"),
            ProviderType::Ollama => write!(f, "ollama"),
        }
    }
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Per-call options attached by the router
#[derive(Debug, Clone, PartialEq)]
pub struct CallOptions {
    /// Model identifier sent to the provider
    pub model: String,
    /// Only set for high-reasoning backends
    pub effort: Option<ReasoningEffort>,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// One completion request
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub options: CallOptions,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>, options: CallOptions) -> Self {
        Self { messages, options }
    }
}

/// Token usage information
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

impl CompletionResponse {
    pub fn text(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
            finish_reason: Some("stop".to_string()),
            usage: None,
        }
    }
}

/// Backend call failure
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),
}

impl BackendError {
    /// Failures worth retrying with the same input
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::RateLimited(_)
            | BackendError::Transport(_)
            | BackendError::Timeout(_) => true,
            BackendError::Api { status, .. } => *status >= 500,
            BackendError::Authentication(_) | BackendError::InvalidResponse(_) => false,
        }
    }
}

impl From<BackendError> for sa_core::Error {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Authentication(msg) => sa_core::Error::BackendAuth(msg),
            BackendError::RateLimited(msg) => sa_core::Error::BackendRateLimited(msg),
            BackendError::Timeout(d) => {
                sa_core::Error::Timeout(format!("backend call exceeded {:?}", d))
            }
            other => sa_core::Error::Backend(other.to_string()),
        }
    }
}

/// Boxed backend for dynamic dispatch
pub type SharedBackend = std::sync::Arc<dyn ReasoningBackend>;

/// Reasoning backend capability
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    /// Get provider type
    fn provider_type(&self) -> ProviderType;

    /// Whether the backend has the credentials it needs
    fn has_credentials(&self) -> bool {
        true
    }

    /// Run one completion
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<CompletionResponse, BackendError>;
}
