//! OpenAI-compatible chat completions client
//!
//! ## API Endpoints
//!
//! | Endpoint | URL | Purpose |
//! |----------|-----|--------|
//! | OpenAI | `https://api.openai.com/v1` | Hosted models |
//! | Ollama | `http://localhost:11434/v1` | Local models, OpenAI wire format |
//! | Chat | `/chat/completions` | Chat completions |
//!
//! ## Authentication
//! - Header: `Authorization: Bearer {OPENAI_API_KEY}`
//! - Ollama: `OLLAMA_API_KEY` (optional), `OLLAMA_BASE_URL` overrides the endpoint
//!
//! ## Status mapping
//! - 401 / 403 → `BackendError::Authentication`
//! - 429 → `BackendError::RateLimited`
//! - other non-2xx → `BackendError::Api`

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use sa_core::config::{get_config, get_config_opt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::provider::{
    BackendError, ChatMessage, CompletionRequest, CompletionResponse, ProviderType,
    ReasoningBackend, TokenUsage,
};

/// API endpoints
pub mod endpoints {
    /// OpenAI API base
    pub const OPENAI_API: &str = "https://api.openai.com/v1";

    /// Local Ollama OpenAI-compatible base
    pub const OLLAMA_LOCAL_API: &str = "http://localhost:11434/v1";

    /// Chat endpoint
    /// Full URL: {API}/chat/completions
    pub const CHAT: &str = "/chat/completions";
}

#[derive(Debug, Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionReply {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ReplyChoice>,
    #[serde(default)]
    usage: Option<ReplyUsage>,
}

#[derive(Debug, Deserialize)]
struct ReplyChoice {
    message: ReplyMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReplyUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

/// OpenAI-compatible client
pub struct OpenAiClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    provider: ProviderType,
}

impl OpenAiClient {
    /// Client for the hosted OpenAI API
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: build_client(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: endpoints::OPENAI_API.to_string(),
            provider: ProviderType::OpenAI,
        }
    }

    /// Create from `OPENAI_API_KEY`
    pub fn from_env() -> Self {
        Self::new(get_config_opt("OPENAI_API_KEY"))
    }

    /// Client for an Ollama server, from `OLLAMA_BASE_URL` and `OLLAMA_API_KEY`
    pub fn ollama_from_env() -> Self {
        let base_url = get_config("OLLAMA_BASE_URL", endpoints::OLLAMA_LOCAL_API);
        Self {
            client: build_client(),
            api_key: get_config_opt("OLLAMA_API_KEY"),
            base_url,
            provider: ProviderType::Ollama,
        }
    }

    /// Override the API base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn status_error(status: StatusCode, body: String) -> BackendError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                BackendError::Authentication(format!("{}: {}", status, body))
            }
            StatusCode::TOO_MANY_REQUESTS => BackendError::RateLimited(body),
            other => BackendError::Api {
                status: other.as_u16(),
                body,
            },
        }
    }
}

fn build_client() -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(15))
        .build()
        .unwrap_or_default()
}

#[async_trait]
impl ReasoningBackend for OpenAiClient {
    fn provider_type(&self) -> ProviderType {
        self.provider
    }

    fn has_credentials(&self) -> bool {
        match self.provider {
            ProviderType::OpenAI => self.api_key.is_some(),
            ProviderType::Ollama => true,
        }
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, BackendError> {
        let url = format!("{}{}", self.base_url, endpoints::CHAT);
        let options = &request.options;

        // Reasoning models take max_completion_tokens and no temperature
        let body = match options.effort {
            Some(effort) => ChatCompletionBody {
                model: &options.model,
                messages: &request.messages,
                max_tokens: None,
                max_completion_tokens: Some(options.max_tokens),
                temperature: None,
                reasoning_effort: Some(effort.to_string()),
            },
            None => ChatCompletionBody {
                model: &options.model,
                messages: &request.messages,
                max_tokens: Some(options.max_tokens),
                max_completion_tokens: None,
                temperature: Some(0.0),
                reasoning_effort: None,
            },
        };

        debug!(provider = %self.provider, model = %options.model, url = %url, "Sending completion request");

        let mut req = self.client.post(&url).timeout(options.timeout).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout(options.timeout)
            } else {
                BackendError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, body));
        }

        let reply: ChatCompletionReply = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        let choice = reply
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::InvalidResponse("reply has no choices".to_string()))?;

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            model: reply.model.unwrap_or_else(|| options.model.clone()),
            finish_reason: choice.finish_reason,
            usage: reply.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        })
    }
}
