//! Backend Router
//!
//! Maps each pipeline stage onto a concrete backend. When the operator
//! selects a high-reasoning backend, only decomposition, code generation and
//! debugging stay on it; every other stage goes to the fast backend.
//! Otherwise every stage uses the selected backend.
//!
//! Resolution is a pure lookup; no backend is contacted.

use sa_core::{Error, ReasoningEffort, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::openai::OpenAiClient;
use crate::provider::{
    BackendError, CallOptions, ChatMessage, CompletionRequest, CompletionResponse, ProviderType,
    SharedBackend,
};
use crate::stage::Stage;

/// Name of the fixed fast backend
pub const FAST_BACKEND: &str = "gpt-4o";

/// Reasoning effort levels a model family understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffortLevels {
    /// minimal, low, medium, high
    Graded,
    /// none, low, high only
    Coarse,
}

impl EffortLevels {
    pub fn normalize(&self, effort: ReasoningEffort) -> ReasoningEffort {
        match self {
            EffortLevels::Graded => match effort {
                ReasoningEffort::None => ReasoningEffort::Minimal,
                other => other,
            },
            EffortLevels::Coarse => match effort {
                ReasoningEffort::None => ReasoningEffort::None,
                ReasoningEffort::High => ReasoningEffort::High,
                _ => ReasoningEffort::Low,
            },
        }
    }
}

/// A named backend the router can hand out
#[derive(Clone)]
pub struct BackendProfile {
    pub name: String,
    /// Model identifier sent on the wire
    pub model: String,
    pub high_reasoning: bool,
    pub effort_levels: EffortLevels,
    pub backend: SharedBackend,
}

impl BackendProfile {
    pub fn new(name: impl Into<String>, backend: SharedBackend) -> Self {
        let name = name.into();
        Self {
            model: name.clone(),
            name,
            high_reasoning: false,
            effort_levels: EffortLevels::Graded,
            backend,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn high_reasoning(mut self, levels: EffortLevels) -> Self {
        self.high_reasoning = true;
        self.effort_levels = levels;
        self
    }

    pub fn provider_type(&self) -> ProviderType {
        self.backend.provider_type()
    }
}

impl std::fmt::Debug for BackendProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendProfile")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("high_reasoning", &self.high_reasoning)
            .field("provider", &self.backend.provider_type())
            .finish()
    }
}

/// A resolved backend plus the options for one stage
#[derive(Clone)]
pub struct BackendHandle {
    pub stage: Stage,
    pub backend_name: String,
    pub options: CallOptions,
    backend: SharedBackend,
}

impl BackendHandle {
    /// Run one completion under the handle's timeout
    pub async fn complete(
        &self,
        messages: Vec<ChatMessage>,
    ) -> std::result::Result<CompletionResponse, BackendError> {
        let timeout = self.options.timeout;
        let request = CompletionRequest::new(messages, self.options.clone());
        debug!(stage = %self.stage, backend = %self.backend_name, "Calling backend");
        match tokio::time::timeout(timeout, self.backend.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(timeout)),
        }
    }
}

impl std::fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendHandle")
            .field("stage", &self.stage)
            .field("backend_name", &self.backend_name)
            .field("options", &self.options)
            .finish()
    }
}

/// Stage-to-backend router
#[derive(Debug, Clone)]
pub struct BackendRouter {
    profiles: HashMap<String, BackendProfile>,
    fast_backend: String,
    effort: ReasoningEffort,
    timeout: Duration,
}

impl BackendRouter {
    pub fn new() -> Self {
        Self {
            profiles: HashMap::new(),
            fast_backend: FAST_BACKEND.to_string(),
            effort: ReasoningEffort::default(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Register a profile, replacing any profile with the same name
    pub fn register(mut self, profile: BackendProfile) -> Self {
        self.profiles.insert(profile.name.clone(), profile);
        self
    }

    pub fn with_fast_backend(mut self, name: impl Into<String>) -> Self {
        self.fast_backend = name.into();
        self
    }

    pub fn with_effort(mut self, effort: ReasoningEffort) -> Self {
        self.effort = effort;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn profile(&self, name: &str) -> Option<&BackendProfile> {
        self.profiles.get(name)
    }

    /// Registered profile names, sorted
    pub fn profile_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.profiles.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve the backend for one stage
    pub fn resolve(&self, stage: Stage, selected: &str) -> Result<BackendHandle> {
        let selected_profile = self
            .profiles
            .get(selected)
            .ok_or_else(|| {
                Error::configuration(format!(
                    "unknown backend '{}' (available: {})",
                    selected,
                    self.profile_names().join(", ")
                ))
            })?;

        let target = if selected_profile.high_reasoning && !stage.needs_deep_reasoning() {
            self.profiles.get(&self.fast_backend).ok_or_else(|| {
                Error::configuration(format!(
                    "fast backend '{}' is not registered",
                    self.fast_backend
                ))
            })?
        } else {
            selected_profile
        };

        if !target.backend.has_credentials() {
            return Err(Error::configuration(format!(
                "backend '{}' requires credentials but none are configured",
                target.name
            )));
        }

        let effort = target
            .high_reasoning
            .then(|| target.effort_levels.normalize(self.effort));

        Ok(BackendHandle {
            stage,
            backend_name: target.name.clone(),
            options: CallOptions {
                model: target.model.clone(),
                effort,
                max_tokens: stage.token_budget(),
                timeout: self.timeout,
            },
            backend: target.backend.clone(),
        })
    }

    /// Check every stage resolves for the selected backend
    pub fn check(&self, selected: &str) -> Result<()> {
        for stage in Stage::ALL {
            self.resolve(stage, selected)?;
        }
        Ok(())
    }
}

impl Default for BackendRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Local models served through Ollama
pub const OLLAMA_MODELS: &[&str] = &[
    "gpt-oss:20b",
    "gpt-oss:120b",
    "llama3.1:70b",
    "llama4:latest",
    "qwen3:32b",
    "deepseek-r1:70b",
    "mistral:latest",
];

/// Router with the stock OpenAI and Ollama profiles, credentials from environment
pub fn default_router() -> BackendRouter {
    let openai: SharedBackend = Arc::new(OpenAiClient::from_env());
    let ollama: SharedBackend = Arc::new(OpenAiClient::ollama_from_env());

    let mut router = BackendRouter::new()
        .register(BackendProfile::new("gpt-4o", openai.clone()))
        .register(BackendProfile::new("gpt-4o-mini", openai.clone()))
        .register(BackendProfile::new("gpt-5", openai.clone()).high_reasoning(EffortLevels::Graded))
        .register(
            BackendProfile::new("gpt-5.1", openai.clone()).high_reasoning(EffortLevels::Coarse),
        );
    for model in OLLAMA_MODELS {
        router = router.register(BackendProfile::new(*model, ollama.clone()));
    }
    router
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ReasoningBackend;
    use async_trait::async_trait;

    struct FixedBackend {
        credentials: bool,
        delay: Duration,
    }

    #[async_trait]
    impl ReasoningBackend for FixedBackend {
        fn provider_type(&self) -> ProviderType {
            ProviderType::OpenAI
        }

        fn has_credentials(&self) -> bool {
            self.credentials
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> std::result::Result<CompletionResponse, BackendError> {
            tokio::time::sleep(self.delay).await;
            Ok(CompletionResponse::text("ok", request.options.model))
        }
    }

    fn backend(credentials: bool) -> SharedBackend {
        Arc::new(FixedBackend {
            credentials,
            delay: Duration::ZERO,
        })
    }

    fn router() -> BackendRouter {
        BackendRouter::new()
            .register(BackendProfile::new("gpt-4o", backend(true)))
            .register(
                BackendProfile::new("gpt-5.1", backend(true)).high_reasoning(EffortLevels::Coarse),
            )
            .register(BackendProfile::new("qwen3:32b", backend(true)))
            .with_effort(ReasoningEffort::Medium)
    }

    #[test]
    fn test_high_reasoning_split() {
        let router = router();
        for stage in Stage::ALL {
            let handle = router.resolve(stage, "gpt-5.1").unwrap();
            if stage.needs_deep_reasoning() {
                assert_eq!(handle.backend_name, "gpt-5.1");
                assert_eq!(handle.options.effort, Some(ReasoningEffort::Low));
            } else {
                assert_eq!(handle.backend_name, FAST_BACKEND);
                assert_eq!(handle.options.effort, None);
            }
            assert_eq!(handle.options.max_tokens, stage.token_budget());
        }
    }

    #[test]
    fn test_plain_backend_handles_every_stage() {
        let router = router();
        for stage in Stage::ALL {
            let handle = router.resolve(stage, "qwen3:32b").unwrap();
            assert_eq!(handle.backend_name, "qwen3:32b");
            assert_eq!(handle.options.effort, None);
        }
    }

    #[test]
    fn test_unknown_backend() {
        let err = router().resolve(Stage::Naming, "gpt-9").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        let text = err.to_string();
        assert!(text.contains("unknown backend 'gpt-9'"));
        assert!(text.contains("(available: gpt-4o, gpt-5.1, qwen3:32b)"));
    }

    #[test]
    fn test_missing_credentials() {
        let router = BackendRouter::new()
            .register(BackendProfile::new("gpt-4o", backend(false)))
            .register(
                BackendProfile::new("gpt-5", backend(true)).high_reasoning(EffortLevels::Graded),
            );
        assert!(router.resolve(Stage::Decomposition, "gpt-5").is_ok());
        assert!(matches!(
            router.resolve(Stage::Naming, "gpt-5"),
            Err(Error::Configuration(_))
        ));
        assert!(router.check("gpt-5").is_err());
    }

    #[test]
    fn test_effort_normalization() {
        assert_eq!(EffortLevels::Coarse.normalize(ReasoningEffort::Minimal), ReasoningEffort::Low);
        assert_eq!(EffortLevels::Coarse.normalize(ReasoningEffort::Medium), ReasoningEffort::Low);
        assert_eq!(EffortLevels::Coarse.normalize(ReasoningEffort::None), ReasoningEffort::None);
        assert_eq!(EffortLevels::Graded.normalize(ReasoningEffort::Medium), ReasoningEffort::Medium);
        assert_eq!(EffortLevels::Graded.normalize(ReasoningEffort::None), ReasoningEffort::Minimal);
    }

    #[tokio::test]
    async fn test_handle_timeout() {
        let slow: SharedBackend = Arc::new(FixedBackend {
            credentials: true,
            delay: Duration::from_secs(5),
        });
        let router = BackendRouter::new()
            .register(BackendProfile::new("gpt-4o", slow))
            .with_timeout(Duration::from_millis(20));
        let handle = router.resolve(Stage::Naming, "gpt-4o").unwrap();
        let result = handle.complete(vec![ChatMessage::user("hi")]).await;
        assert!(matches!(result, Err(BackendError::Timeout(_))));
    }
}
