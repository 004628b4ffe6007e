//! Test doubles for unit tests

use async_trait::async_trait;
use sa_llm::{
    BackendError, BackendProfile, BackendRouter, CompletionRequest, CompletionResponse,
    ProviderType, ReasoningBackend,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Backend answering calls from a queue, in call order
pub struct QueueBackend {
    replies: Mutex<VecDeque<Result<String, BackendError>>>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl QueueBackend {
    pub fn new(replies: Vec<Result<String, BackendError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn replies(replies: &[&str]) -> Arc<Self> {
        Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// User message of call `i`
    pub fn prompt(&self, i: usize) -> String {
        self.requests.lock().unwrap()[i].messages.last().unwrap().content.clone()
    }
}

#[async_trait]
impl ReasoningBackend for QueueBackend {
    fn provider_type(&self) -> ProviderType {
        ProviderType::OpenAI
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, BackendError> {
        let model = request.options.model.clone();
        self.requests.lock().unwrap().push(request);
        let next = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::InvalidResponse("no scripted reply left".into())));
        next.map(|content| CompletionResponse::text(content, model))
    }
}

/// Router with a single `gpt-4o` profile backed by `backend`
pub fn router(backend: Arc<QueueBackend>) -> BackendRouter {
    BackendRouter::new().register(BackendProfile::new("gpt-4o", backend))
}
