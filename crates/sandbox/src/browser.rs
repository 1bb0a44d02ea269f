//! In-Browser Runtime Backend
//!
//! A cooperative Node runtime living in the caller's browser tab. The engine
//! never owns that runtime: the caller hands over a live [`BrowserRuntime`]
//! bridge and every operation is forwarded through it. Nothing persists
//! across sessions, so `connect` only succeeds for the bridge's own session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};

use appforge_core::Framework;

use crate::dev_server::{self, PollPolicy, ReadinessProbe};
use crate::environment::{
    Capabilities, CommandOptions, CommandOutput, EnvironmentFactory, EnvironmentKind,
    ExecutionEnvironment, FileEntry, ProcessHandle,
};
use crate::error::{SandboxError, SandboxResult};
use crate::path::{join_root, validate_dir, validate_path};

const BROWSER_ROOT: &str = "/home/project";
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);
/// Shell the browser runtime ships with.
const SHELL: &str = "jsh";

/// Options for [`BrowserRuntime::spawn`].
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    /// Absolute working directory
    pub cwd: String,
    pub env: HashMap<String, String>,
}

/// A process started through the bridge. The runtime merges stdout and
/// stderr into one `output` stream, closed when the process exits.
pub struct BridgeProcess {
    pub id: String,
    pub output: mpsc::Receiver<String>,
    pub exit: oneshot::Receiver<i32>,
}

/// Bridge to the caller's live in-browser runtime. Paths are absolute.
#[async_trait]
pub trait BrowserRuntime: Send + Sync {
    fn session_id(&self) -> &str;

    async fn write_file(&self, path: &str, content: &str) -> SandboxResult<()>;

    /// `Ok(None)` when the file does not exist.
    async fn read_file(&self, path: &str) -> SandboxResult<Option<String>>;

    async fn read_dir(&self, path: &str) -> SandboxResult<Vec<FileEntry>>;

    async fn remove(&self, path: &str) -> SandboxResult<()>;

    async fn spawn(
        &self,
        program: &str,
        args: &[String],
        options: SpawnOptions,
    ) -> SandboxResult<BridgeProcess>;

    async fn kill(&self, process_id: &str) -> SandboxResult<()>;

    /// URL the runtime exposes for a port, once a server listens on it.
    fn preview_url(&self, port: u16) -> Option<String>;

    async fn is_port_ready(&self, port: u16) -> bool;

    async fn teardown(&self) -> SandboxResult<()>;
}

pub struct BrowserEnvironment {
    runtime: Arc<dyn BrowserRuntime>,
    capabilities: Capabilities,
    active: AtomicBool,
}

impl BrowserEnvironment {
    pub fn new(runtime: Arc<dyn BrowserRuntime>) -> Self {
        Self {
            runtime,
            capabilities: Capabilities::in_browser(),
            active: AtomicBool::new(true),
        }
    }
}

struct BrowserProcess {
    id: String,
    runtime: Arc<dyn BrowserRuntime>,
    exit: Mutex<Option<oneshot::Receiver<i32>>>,
}

#[async_trait]
impl ProcessHandle for BrowserProcess {
    fn id(&self) -> &str {
        &self.id
    }

    async fn kill(&self) -> SandboxResult<()> {
        self.runtime.kill(&self.id).await
    }

    async fn wait_exit(&self) -> SandboxResult<i32> {
        let exit = self
            .exit
            .lock()
            .await
            .take()
            .ok_or_else(|| SandboxError::Bridge(format!("process {} already awaited", self.id)))?;
        exit.await
            .map_err(|_| SandboxError::Bridge(format!("process {} exit status lost", self.id)))
    }
}

struct PortProbe {
    runtime: Arc<dyn BrowserRuntime>,
    port: u16,
}

#[async_trait]
impl ReadinessProbe for PortProbe {
    async fn is_ready(&self, _url: &str) -> bool {
        self.runtime.is_port_ready(self.port).await
    }
}

#[async_trait]
impl ExecutionEnvironment for BrowserEnvironment {
    fn id(&self) -> &str {
        self.runtime.session_id()
    }

    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::InBrowser
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn root(&self) -> &str {
        BROWSER_ROOT
    }

    async fn write_file(&self, path: &str, content: &str) -> SandboxResult<()> {
        self.ensure_active()?;
        let path = validate_path(BROWSER_ROOT, path)?;
        self.check_size(&path, content)?;
        self.runtime
            .write_file(&join_root(BROWSER_ROOT, &path), content)
            .await
    }

    async fn read_file(&self, path: &str) -> SandboxResult<String> {
        self.ensure_active()?;
        let path = validate_path(BROWSER_ROOT, path)?;
        self.runtime
            .read_file(&join_root(BROWSER_ROOT, &path))
            .await?
            .ok_or(SandboxError::NotFound(path))
    }

    async fn list_files(&self, dir: &str) -> SandboxResult<Vec<FileEntry>> {
        self.ensure_active()?;
        let dir = validate_dir(BROWSER_ROOT, dir)?;
        let entries = self.runtime.read_dir(&join_root(BROWSER_ROOT, &dir)).await?;
        Ok(entries
            .into_iter()
            .map(|mut e| {
                if let Some(rest) = e.path.strip_prefix(BROWSER_ROOT) {
                    e.path = rest.trim_start_matches('/').to_string();
                }
                e
            })
            .collect())
    }

    async fn delete_file(&self, path: &str) -> SandboxResult<()> {
        self.ensure_active()?;
        let path = validate_path(BROWSER_ROOT, path)?;
        self.runtime.remove(&join_root(BROWSER_ROOT, &path)).await
    }

    async fn run_command(
        &self,
        command: &str,
        options: CommandOptions,
    ) -> SandboxResult<CommandOutput> {
        self.ensure_active()?;
        let cwd = match &options.cwd {
            Some(dir) => join_root(BROWSER_ROOT, &validate_dir(BROWSER_ROOT, dir)?),
            None => BROWSER_ROOT.to_string(),
        };
        let timeout = options.timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT);
        let mut process = self
            .runtime
            .spawn(
                SHELL,
                &["-c".to_string(), command.to_string()],
                SpawnOptions {
                    cwd,
                    env: options.env.clone(),
                },
            )
            .await?;
        let process_id = process.id.clone();
        let on_stdout = options.on_stdout.clone();

        let run = async move {
            let mut stdout = String::new();
            while let Some(chunk) = process.output.recv().await {
                if let Some(sink) = &on_stdout {
                    sink(&chunk);
                }
                stdout.push_str(&chunk);
            }
            let exit_code = process.exit.await.unwrap_or(-1);
            (stdout, exit_code)
        };

        match tokio::time::timeout(timeout, run).await {
            Ok((stdout, exit_code)) => Ok(CommandOutput {
                stdout,
                stderr: String::new(),
                exit_code,
            }),
            Err(_) => {
                tracing::warn!(
                    env = self.id(),
                    command,
                    timeout_ms = timeout.as_millis() as u64,
                    "browser command timed out"
                );
                if let Err(e) = self.runtime.kill(&process_id).await {
                    tracing::debug!(error = %e, "failed to kill timed out process");
                }
                Err(SandboxError::Timeout(timeout.as_millis() as u64))
            }
        }
    }

    async fn spawn_process(
        &self,
        program: &str,
        args: &[String],
    ) -> SandboxResult<Box<dyn ProcessHandle>> {
        self.ensure_active()?;
        let BridgeProcess {
            id,
            mut output,
            exit,
        } = self
            .runtime
            .spawn(
                program,
                args,
                SpawnOptions {
                    cwd: BROWSER_ROOT.to_string(),
                    env: HashMap::new(),
                },
            )
            .await?;

        // Keep the output channel drained so the runtime never blocks on it.
        let process_id = id.clone();
        tokio::spawn(async move {
            while let Some(chunk) = output.recv().await {
                tracing::trace!(process = %process_id, output = %chunk.trim_end());
            }
        });

        Ok(Box::new(BrowserProcess {
            id,
            runtime: self.runtime.clone(),
            exit: Mutex::new(Some(exit)),
        }))
    }

    fn server_url(&self, port: u16) -> String {
        self.runtime
            .preview_url(port)
            .unwrap_or_else(|| format!("http://localhost:{}", port))
    }

    async fn start_dev_server(&self, framework: Framework) -> SandboxResult<String> {
        let probe = PortProbe {
            runtime: self.runtime.clone(),
            port: framework.dev_port(),
        };
        dev_server::launch(self, framework, &probe, &PollPolicy::default()).await
    }

    async fn dispose(&self) -> SandboxResult<()> {
        if self.active.swap(false, Ordering::SeqCst) {
            self.runtime.teardown().await?;
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Wraps the caller's live runtime. There is exactly one session per factory.
pub struct BrowserEnvironmentFactory {
    runtime: Arc<dyn BrowserRuntime>,
}

impl BrowserEnvironmentFactory {
    pub fn new(runtime: Arc<dyn BrowserRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl EnvironmentFactory for BrowserEnvironmentFactory {
    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::InBrowser
    }

    async fn create(&self, framework: Framework) -> SandboxResult<Arc<dyn ExecutionEnvironment>> {
        tracing::debug!(
            session = self.runtime.session_id(),
            template = framework.template_id(),
            "attaching to in-browser runtime"
        );
        Ok(Arc::new(BrowserEnvironment::new(self.runtime.clone())))
    }

    async fn connect(&self, id: &str) -> SandboxResult<Arc<dyn ExecutionEnvironment>> {
        if id != self.runtime.session_id() {
            return Err(SandboxError::provisioning(format!(
                "in-browser environment {} is not the caller's live session",
                id
            )));
        }
        Ok(Arc::new(BrowserEnvironment::new(self.runtime.clone())))
    }
}
