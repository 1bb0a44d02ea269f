//! AppForge Core
//!
//! Foundational types shared by every crate in the AppForge workspace. This
//! crate has no dependency on model providers, execution environments, or the
//! orchestration engine itself.
//!
//! ## Module Organization
//!
//! - `error` - Core error types (`CoreError`, `CoreResult`)
//! - `framework` - The fixed catalogue of supported web application frameworks
//! - `streaming` - Provider-level stream events and the adapter trait
//! - `events` - Run-level `StreamEvent` values delivered to engine callers
//! - `proxy` - Proxy configuration shared by HTTP-using crates
//!
//! ## Design Principles
//!
//! 1. **Only serde/thiserror/chrono** - keeps build times minimal
//! 2. **Unidirectional dependency** - this crate depends on nothing else in the workspace

pub mod error;
pub mod events;
pub mod framework;
pub mod proxy;
pub mod streaming;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Frameworks ─────────────────────────────────────────────────────────
pub use framework::Framework;

// ── Run Events ─────────────────────────────────────────────────────────
pub use events::{EventPayload, StreamEvent};

// ── Proxy Types ────────────────────────────────────────────────────────
pub use proxy::{ProxyConfig, ProxyProtocol};

// ── Streaming Types ────────────────────────────────────────────────────
pub use streaming::{AdapterError, StreamAdapter, UnifiedStreamEvent};
