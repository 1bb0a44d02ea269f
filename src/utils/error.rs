//! Error Handling
//!
//! Unified error type for the engine.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use appforge_llm::LlmError;
use appforge_sandbox::SandboxError;

/// Engine-wide error type
#[derive(Error, Debug)]
pub enum EngineError {
    /// Project or other stored record missing
    #[error("{0}")]
    NotFound(String),

    /// Execution environment could not be created or reached
    #[error("Environment provisioning failed: {0}")]
    Provisioning(String),

    /// Execution environment operation failed
    #[error("Environment error: {0}")]
    Environment(#[from] SandboxError),

    /// Model call failed after the fallback chain gave up
    #[error("Model error: {0}")]
    Llm(#[from] LlmError),

    /// Persistent store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Search or crawl failure
    #[error("Web error: {0}")]
    Web(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML parse errors
    #[error("Configuration parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The consumer went away
    #[error("Run cancelled")]
    Cancelled,

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for engine errors
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a provisioning error
    pub fn provisioning(msg: impl Into<String>) -> Self {
        Self::Provisioning(msg.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a web error
    pub fn web(msg: impl Into<String>) -> Self {
        Self::Web(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable code carried on `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Provisioning(_) | Self::Environment(_) => "environment",
            Self::Llm(_) => "model",
            Self::Store(_) => "store",
            Self::Web(_) => "web",
            Self::Config(_) | Self::Toml(_) => "config",
            Self::Io(_) | Self::Serialization(_) | Self::Internal(_) => "internal",
            Self::Cancelled => "cancelled",
        }
    }
}
