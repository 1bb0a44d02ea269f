//! In-Memory Environment
//!
//! A file store with no operating system behind it. Commands and background
//! processes are unsupported unless a command handler is installed, which
//! lets tests and embedders script build results without a real sandbox.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{watch, RwLock};

use appforge_core::Framework;

use crate::dev_server::{self, PollPolicy, ReadinessProbe};
use crate::environment::{
    Capabilities, CommandOptions, CommandOutput, EnvironmentFactory, EnvironmentKind,
    ExecutionEnvironment, FileEntry, ProcessHandle,
};
use crate::error::{SandboxError, SandboxResult};
use crate::path::{validate_dir, validate_path};

/// Scripted command behavior: `(command, options) -> output`.
pub type CommandHandler = Arc<dyn Fn(&str, &CommandOptions) -> CommandOutput + Send + Sync>;

const MEMORY_ROOT: &str = "/workspace";

pub struct MemoryEnvironment {
    id: String,
    template: Option<Framework>,
    capabilities: Capabilities,
    files: RwLock<BTreeMap<String, String>>,
    active: AtomicBool,
    command_handler: Option<CommandHandler>,
    command_log: Mutex<Vec<String>>,
    spawned: Arc<AtomicU32>,
}

impl MemoryEnvironment {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            template: None,
            capabilities: Capabilities::in_memory(),
            files: RwLock::new(BTreeMap::new()),
            active: AtomicBool::new(true),
            command_handler: None,
            command_log: Mutex::new(Vec::new()),
            spawned: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Accept shell commands, answered by `handler`.
    pub fn with_command_handler(mut self, handler: CommandHandler) -> Self {
        self.command_handler = Some(handler);
        self.capabilities.supports_bash = true;
        self
    }

    /// Accept background processes (they run until killed and do nothing).
    pub fn with_background_processes(mut self) -> Self {
        self.capabilities.supports_background_processes = true;
        self
    }

    /// Record the framework template this environment was created from.
    pub fn with_template(mut self, framework: Framework) -> Self {
        self.template = Some(framework);
        self
    }

    pub fn template(&self) -> Option<Framework> {
        self.template
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.capabilities.max_file_size_bytes = bytes;
        self
    }

    /// Copy of every stored file.
    pub async fn snapshot(&self) -> BTreeMap<String, String> {
        self.files.read().await.clone()
    }

    /// Commands run so far, in order.
    pub fn command_log(&self) -> Vec<String> {
        self.command_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }
}

/// Ready once any background process has been spawned.
struct SpawnedProbe {
    spawned: Arc<AtomicU32>,
}

#[async_trait]
impl ReadinessProbe for SpawnedProbe {
    async fn is_ready(&self, _url: &str) -> bool {
        self.spawned.load(Ordering::SeqCst) > 0
    }
}

struct MemoryProcess {
    id: String,
    exit: watch::Sender<Option<i32>>,
}

#[async_trait]
impl ProcessHandle for MemoryProcess {
    fn id(&self) -> &str {
        &self.id
    }

    async fn kill(&self) -> SandboxResult<()> {
        self.exit.send_replace(Some(137));
        Ok(())
    }

    async fn wait_exit(&self) -> SandboxResult<i32> {
        let mut rx = self.exit.subscribe();
        let code = rx
            .wait_for(|code| code.is_some())
            .await
            .map_err(|_| SandboxError::NotFound(format!("process {}", self.id)))?;
        Ok(code.unwrap_or(137))
    }
}

#[async_trait]
impl ExecutionEnvironment for MemoryEnvironment {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::InMemory
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn root(&self) -> &str {
        MEMORY_ROOT
    }

    async fn write_file(&self, path: &str, content: &str) -> SandboxResult<()> {
        self.ensure_active()?;
        let path = validate_path(MEMORY_ROOT, path)?;
        self.check_size(&path, content)?;
        self.files.write().await.insert(path, content.to_string());
        Ok(())
    }

    async fn read_file(&self, path: &str) -> SandboxResult<String> {
        self.ensure_active()?;
        let path = validate_path(MEMORY_ROOT, path)?;
        self.files
            .read()
            .await
            .get(&path)
            .cloned()
            .ok_or(SandboxError::NotFound(path))
    }

    async fn list_files(&self, dir: &str) -> SandboxResult<Vec<FileEntry>> {
        self.ensure_active()?;
        let dir = validate_dir(MEMORY_ROOT, dir)?;
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{}/", dir)
        };
        Ok(self
            .files
            .read()
            .await
            .iter()
            .filter(|(path, _)| path.starts_with(&prefix))
            .map(|(path, content)| FileEntry {
                path: path.clone(),
                is_dir: false,
                size: content.len() as u64,
            })
            .collect())
    }

    async fn delete_file(&self, path: &str) -> SandboxResult<()> {
        self.ensure_active()?;
        let path = validate_path(MEMORY_ROOT, path)?;
        match self.files.write().await.remove(&path) {
            Some(_) => Ok(()),
            None => Err(SandboxError::NotFound(path)),
        }
    }

    async fn run_command(
        &self,
        command: &str,
        options: CommandOptions,
    ) -> SandboxResult<CommandOutput> {
        self.ensure_active()?;
        let handler = self
            .command_handler
            .as_ref()
            .ok_or_else(|| SandboxError::unsupported(self.kind(), "run_command"))?;

        if let Ok(mut log) = self.command_log.lock() {
            log.push(command.to_string());
        }
        let output = handler(command, &options);
        if let (Some(sink), false) = (&options.on_stdout, output.stdout.is_empty()) {
            sink(&output.stdout);
        }
        if let (Some(sink), false) = (&options.on_stderr, output.stderr.is_empty()) {
            sink(&output.stderr);
        }
        Ok(output)
    }

    async fn spawn_process(
        &self,
        program: &str,
        args: &[String],
    ) -> SandboxResult<Box<dyn ProcessHandle>> {
        self.ensure_active()?;
        if !self.capabilities.supports_background_processes {
            return Err(SandboxError::unsupported(self.kind(), "spawn_process"));
        }
        let n = self.spawned.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut log) = self.command_log.lock() {
            log.push(format!("{} {}", program, args.join(" ")));
        }
        let (exit, _) = watch::channel(None);
        Ok(Box::new(MemoryProcess {
            id: format!("{}-proc-{}", self.id, n),
            exit,
        }))
    }

    fn server_url(&self, port: u16) -> String {
        format!("http://{}.localhost:{}", self.id, port)
    }

    async fn start_dev_server(&self, framework: Framework) -> SandboxResult<String> {
        let probe = SpawnedProbe {
            spawned: self.spawned.clone(),
        };
        dev_server::launch(self, framework, &probe, &PollPolicy::default()).await
    }

    async fn dispose(&self) -> SandboxResult<()> {
        if self.active.swap(false, Ordering::SeqCst) {
            self.files.write().await.clear();
            tracing::debug!(env = %self.id, "in-memory environment disposed");
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Creates in-memory environments and keeps them reachable by id until disposed.
#[derive(Default)]
pub struct MemoryEnvironmentFactory {
    live: DashMap<String, Arc<MemoryEnvironment>>,
    command_handler: Option<CommandHandler>,
    background_processes: bool,
}

impl MemoryEnvironmentFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Environments created by this factory accept commands.
    pub fn with_command_handler(mut self, handler: CommandHandler) -> Self {
        self.command_handler = Some(handler);
        self
    }

    pub fn with_background_processes(mut self) -> Self {
        self.background_processes = true;
        self
    }

    /// The concrete environment behind `id`, for inspection.
    pub fn environment(&self, id: &str) -> Option<Arc<MemoryEnvironment>> {
        self.live.get(id).map(|e| e.value().clone())
    }
}

#[async_trait]
impl EnvironmentFactory for MemoryEnvironmentFactory {
    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::InMemory
    }

    async fn create(&self, framework: Framework) -> SandboxResult<Arc<dyn ExecutionEnvironment>> {
        let id = format!("mem-{}", uuid::Uuid::new_v4().simple());
        let mut env = MemoryEnvironment::new(id.clone()).with_template(framework);
        if let Some(handler) = &self.command_handler {
            env = env.with_command_handler(handler.clone());
        }
        if self.background_processes {
            env = env.with_background_processes();
        }
        let env = Arc::new(env);
        self.live.insert(id.clone(), env.clone());
        tracing::debug!(env = %id, framework = %framework, "in-memory environment created");
        Ok(env)
    }

    async fn connect(&self, id: &str) -> SandboxResult<Arc<dyn ExecutionEnvironment>> {
        self.live.retain(|_, env| env.is_active());
        match self.live.get(id) {
            Some(env) => Ok(env.value().clone()),
            None => Err(SandboxError::NotFound(format!("environment {}", id))),
        }
    }
}
