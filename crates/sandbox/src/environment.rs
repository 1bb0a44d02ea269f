//! Execution Environment Trait
//!
//! One interface over the three backends generated code can run in. Callers
//! check [`Capabilities`] before invoking optional operations; an operation a
//! backend does not offer returns [`SandboxError::Unsupported`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};

use appforge_core::Framework;

use crate::error::{SandboxError, SandboxResult};

/// Concurrent reads per batch in [`ExecutionEnvironment::read_files`].
pub const READ_BATCH_SIZE: usize = 50;

/// Backend tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvironmentKind {
    RemoteSandbox,
    InBrowser,
    InMemory,
}

impl std::fmt::Display for EnvironmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvironmentKind::RemoteSandbox => write!(f, "remote-sandbox"),
            EnvironmentKind::InBrowser => write!(f, "in-browser"),
            EnvironmentKind::InMemory => write!(f, "in-memory"),
        }
    }
}

/// What a backend can do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub supports_background_processes: bool,
    pub persists_across_reconnect: bool,
    pub max_file_size_bytes: u64,
    pub supports_node: bool,
    pub supports_python: bool,
    pub supports_bash: bool,
}

impl Capabilities {
    /// Full Linux sandbox.
    pub fn remote() -> Self {
        Self {
            supports_background_processes: true,
            persists_across_reconnect: true,
            max_file_size_bytes: 100 * 1024 * 1024,
            supports_node: true,
            supports_python: true,
            supports_bash: true,
        }
    }

    /// Cooperative in-browser Node runtime.
    pub fn in_browser() -> Self {
        Self {
            supports_background_processes: true,
            persists_across_reconnect: false,
            max_file_size_bytes: 10 * 1024 * 1024,
            supports_node: true,
            supports_python: false,
            supports_bash: false,
        }
    }

    /// File store only.
    pub fn in_memory() -> Self {
        Self {
            supports_background_processes: false,
            persists_across_reconnect: false,
            max_file_size_bytes: 10 * 1024 * 1024,
            supports_node: false,
            supports_python: false,
            supports_bash: false,
        }
    }

    /// Whether shell commands can be run at all.
    pub fn can_run_commands(&self) -> bool {
        self.supports_bash || self.supports_node
    }
}

/// Receives output chunks as a command produces them.
pub type OutputSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Options for [`ExecutionEnvironment::run_command`].
#[derive(Clone, Default)]
pub struct CommandOptions {
    /// Working directory, relative to the environment root
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
    pub timeout: Option<Duration>,
    pub on_stdout: Option<OutputSink>,
    pub on_stderr: Option<OutputSink>,
}

impl std::fmt::Debug for CommandOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandOptions")
            .field("cwd", &self.cwd)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .field("on_stdout", &self.on_stdout.is_some())
            .field("on_stderr", &self.on_stderr.is_some())
            .finish()
    }
}

impl CommandOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Default::default()
        }
    }
}

/// Result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout and stderr joined, for feeding back to the model.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (true, true) => String::new(),
        }
    }
}

/// Directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Root-relative path
    pub path: String,
    pub is_dir: bool,
    #[serde(default)]
    pub size: u64,
}

/// Handle to a background process.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    fn id(&self) -> &str;
    async fn kill(&self) -> SandboxResult<()>;
    /// Wait for the process to exit and return its exit code.
    async fn wait_exit(&self) -> SandboxResult<i32>;
}

/// A live execution environment.
#[async_trait]
pub trait ExecutionEnvironment: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> EnvironmentKind;

    fn capabilities(&self) -> &Capabilities;

    /// Absolute directory relative paths resolve against.
    fn root(&self) -> &str;

    async fn write_file(&self, path: &str, content: &str) -> SandboxResult<()>;

    /// Write several files in order, stopping at the first failure.
    async fn write_files(&self, files: &[(String, String)]) -> SandboxResult<()> {
        for (path, content) in files {
            self.write_file(path, content).await?;
        }
        Ok(())
    }

    async fn read_file(&self, path: &str) -> SandboxResult<String>;

    /// Read many files, [`READ_BATCH_SIZE`] at a time. Per-file failures are
    /// returned in place; result order equals `paths` order.
    async fn read_files(&self, paths: &[String]) -> Vec<(String, SandboxResult<String>)> {
        let mut results = Vec::with_capacity(paths.len());
        for batch in paths.chunks(READ_BATCH_SIZE) {
            let reads = join_all(batch.iter().map(|p| self.read_file(p))).await;
            results.extend(batch.iter().cloned().zip(reads));
        }
        results
    }

    async fn list_files(&self, dir: &str) -> SandboxResult<Vec<FileEntry>>;

    async fn delete_file(&self, path: &str) -> SandboxResult<()>;

    async fn run_command(&self, command: &str, options: CommandOptions)
        -> SandboxResult<CommandOutput>;

    async fn spawn_process(
        &self,
        program: &str,
        args: &[String],
    ) -> SandboxResult<Box<dyn ProcessHandle>>;

    /// Public URL of a port inside the environment.
    fn server_url(&self, port: u16) -> String;

    /// Start the framework's dev server and return its URL once it answers,
    /// or the deterministic URL if it never does.
    async fn start_dev_server(&self, framework: Framework) -> SandboxResult<String>;

    async fn dispose(&self) -> SandboxResult<()>;

    fn is_active(&self) -> bool;

    /// Fail with [`SandboxError::Inactive`] once disposed.
    fn ensure_active(&self) -> SandboxResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(SandboxError::Inactive(self.id().to_string()))
        }
    }

    /// Reject writes over the backend's size limit.
    fn check_size(&self, path: &str, content: &str) -> SandboxResult<()> {
        let max = self.capabilities().max_file_size_bytes;
        let size = content.len() as u64;
        if size > max {
            return Err(SandboxError::FileTooLarge {
                path: path.to_string(),
                size,
                max,
            });
        }
        Ok(())
    }
}

/// Creates and reconnects environments of one backend kind.
#[async_trait]
pub trait EnvironmentFactory: Send + Sync {
    fn kind(&self) -> EnvironmentKind;

    /// Provision a fresh environment from the framework's template.
    async fn create(&self, framework: Framework) -> SandboxResult<Arc<dyn ExecutionEnvironment>>;

    /// Re-establish a connection to an existing environment.
    async fn connect(&self, id: &str) -> SandboxResult<Arc<dyn ExecutionEnvironment>>;
}
