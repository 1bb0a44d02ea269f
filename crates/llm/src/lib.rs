//! AppForge LLM
//!
//! Model provider layer for the generation engine:
//! - The `LlmProvider` trait and an OpenAI-compatible chat-completions client
//!   used for both direct family endpoints and the routed gateway
//! - The model catalogue and `"auto"` selection rules
//! - Text-based error classification and the retry/fallback ladder
//!
//! Also includes the SSE stream adapter and the HTTP client factory.

pub mod classify;
pub mod fallback;
pub mod http_client;
pub mod models;
pub mod openai;
pub mod provider;
pub mod router;
pub mod streaming_adapters;
pub mod types;

// Re-export main types
pub use classify::{classify, classify_message, ErrorClass};
pub use fallback::{
    Attempt, FallbackChain, RetryAction, RetryNotice, RetryPolicy, DEFAULT_MAX_ATTEMPTS,
    GENERATION_MAX_ATTEMPTS, RATE_LIMIT_DELAY_MS,
};
pub use http_client::{build_http_client, http_client_builder};
pub use models::{
    ModelCapability, ModelCatalog, ModelDescriptor, ModelFamily, SelectionRule, TransportClass,
};
pub use openai::OpenAICompatProvider;
pub use provider::LlmProvider;
pub use router::{EndpointConfig, OpenAICompatFactory, ProviderFactory};
pub use types::*;

// Re-export streaming adapters
pub use streaming_adapters::OpenAIAdapter;
