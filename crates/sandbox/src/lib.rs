//! AppForge Sandbox
//!
//! Execution environments generated code is written to, built in, and served
//! from. One [`ExecutionEnvironment`] trait has three implementations selected
//! by [`EnvironmentKind`]:
//!
//! - `remote` - full Linux sandboxes behind a REST API
//! - `browser` - the caller's in-browser Node runtime, through a bridge trait
//! - `memory` - a plain file store for tests and embedding
//!
//! Supporting modules:
//!
//! - `path` - path validation shared by every backend
//! - `dev_server` - dev server startup with readiness polling
//! - `registry` - id-keyed environment cache with idle TTL eviction

pub mod browser;
pub mod dev_server;
pub mod environment;
pub mod error;
pub mod memory;
pub mod path;
pub mod registry;
pub mod remote;

pub use browser::{
    BridgeProcess, BrowserEnvironment, BrowserEnvironmentFactory, BrowserRuntime, SpawnOptions,
};
pub use dev_server::{HttpProbe, PollPolicy, ReadinessProbe};
pub use environment::{
    Capabilities, CommandOptions, CommandOutput, EnvironmentFactory, EnvironmentKind,
    ExecutionEnvironment, FileEntry, OutputSink, ProcessHandle, READ_BATCH_SIZE,
};
pub use error::{SandboxError, SandboxResult};
pub use memory::{CommandHandler, MemoryEnvironment, MemoryEnvironmentFactory};
pub use path::{validate_dir, validate_path, MAX_PATH_BYTES};
pub use registry::{EnvironmentRegistry, DEFAULT_IDLE_TTL};
pub use remote::{RemoteSandbox, RemoteSandboxConfig, RemoteSandboxFactory};
