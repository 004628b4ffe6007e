//! sa-llm: reasoning backends and stage routing
//!
//! ## Supported Providers & Endpoints
//!
//! | Provider | Base URL | Auth Method |
//! |----------|----------|-------------|
//! | OpenAI | `https://api.openai.com/v1` | `Bearer {OPENAI_API_KEY}` |
//! | Ollama | `http://localhost:11434/v1` | `Bearer {OLLAMA_API_KEY}` (optional) |
//!
//! ## Environment Variables
//!
//! ```bash
//! OPENAI_API_KEY=sk-xxx                          # OpenAI
//! OLLAMA_BASE_URL=http://gpu-box:11434/v1        # Ollama server
//! OLLAMA_API_KEY=xxx                             # Ollama cloud (optional)
//! ```

pub mod openai;
pub mod provider;
pub mod router;
pub mod stage;

pub use openai::OpenAiClient;
pub use provider::{
    BackendError, CallOptions, ChatMessage, CompletionRequest, CompletionResponse, ProviderType,
    ReasoningBackend, SharedBackend, TokenUsage,
};
pub use router::{
    default_router, BackendHandle, BackendProfile, BackendRouter, EffortLevels, FAST_BACKEND,
};
pub use stage::Stage;
