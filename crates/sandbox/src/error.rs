//! Sandbox Error Types

use thiserror::Error;

use crate::environment::EnvironmentKind;
use appforge_core::CoreError;

/// Errors raised by execution environments and the environment registry.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// Path rejected by validation
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Operation not offered by this backend
    #[error("Unsupported operation on {backend} environment: {operation}")]
    Unsupported {
        backend: EnvironmentKind,
        operation: &'static str,
    },

    /// Write larger than the backend allows
    #[error("File too large: {path} is {size} bytes (max {max})")]
    FileTooLarge { path: String, size: u64, max: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    /// Creating or connecting an environment failed
    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    /// Environment was disposed
    #[error("Environment {0} is no longer active")]
    Inactive(String),

    #[error("Command timed out after {0} ms")]
    Timeout(u64),

    /// Remote sandbox API failure
    #[error("Remote sandbox error: {0}")]
    Remote(String),

    /// In-browser runtime bridge failure
    #[error("Browser runtime error: {0}")]
    Bridge(String),

    /// Registry closed or not yet opened
    #[error("Environment registry is closed")]
    RegistryClosed,

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type alias for sandbox operations
pub type SandboxResult<T> = Result<T, SandboxError>;

impl SandboxError {
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn unsupported(backend: EnvironmentKind, operation: &'static str) -> Self {
        Self::Unsupported { backend, operation }
    }

    pub fn provisioning(msg: impl Into<String>) -> Self {
        Self::Provisioning(msg.into())
    }

    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote(msg.into())
    }

    /// Whether the caller violated a capability contract.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}
