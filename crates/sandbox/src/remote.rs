//! Remote Sandbox Backend
//!
//! Full Linux sandboxes behind a REST API. Sandboxes outlive the local
//! cache, so `connect` can re-attach to an id after eviction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use appforge_core::Framework;

use crate::dev_server::{self, HttpProbe, PollPolicy};
use crate::environment::{
    Capabilities, CommandOptions, CommandOutput, EnvironmentFactory, EnvironmentKind,
    ExecutionEnvironment, FileEntry, ProcessHandle,
};
use crate::error::{SandboxError, SandboxResult};
use crate::path::{join_root, validate_dir, validate_path};

const SANDBOX_ROOT: &str = "/home/user";
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);
/// Slack added to the HTTP timeout on top of the command's own timeout.
const TIMEOUT_SLACK: Duration = Duration::from_secs(5);

/// Connection settings for the sandbox API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSandboxConfig {
    pub api_url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    /// Domain preview URLs are served under
    pub domain: String,
}

#[derive(Debug, Serialize)]
struct CreateSandboxBody<'a> {
    template: &'a str,
}

#[derive(Debug, Deserialize)]
struct SandboxInfo {
    sandbox_id: String,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Serialize)]
struct CommandBody<'a> {
    cmd: &'a str,
    cwd: String,
    #[serde(skip_serializing_if = "std::collections::HashMap::is_empty")]
    envs: std::collections::HashMap<String, String>,
    timeout_ms: u64,
    background: bool,
}

#[derive(Debug, Deserialize)]
struct SpawnedProcess {
    pid: u64,
}

#[derive(Debug, Deserialize)]
struct ProcessExit {
    exit_code: i32,
}

#[derive(Debug, Serialize)]
struct WriteBody<'a> {
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ReadBody {
    content: String,
}

struct Api {
    client: Client,
    config: RemoteSandboxConfig,
}

impl Api {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    async fn send(&self, request: RequestBuilder) -> SandboxResult<Response> {
        let response = request
            .header("X-API-Key", &self.config.api_key)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SandboxError::remote(format!("request timed out: {}", e))
                } else {
                    SandboxError::remote(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => SandboxError::NotFound(body),
            _ => SandboxError::remote(format!("HTTP {}: {}", status.as_u16(), body)),
        })
    }

    async fn json<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> SandboxResult<T> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| SandboxError::remote(format!("invalid response body: {}", e)))
    }
}

pub struct RemoteSandbox {
    id: String,
    api: Arc<Api>,
    capabilities: Capabilities,
    active: AtomicBool,
}

impl RemoteSandbox {
    fn new(id: String, api: Arc<Api>) -> Self {
        Self {
            id,
            api,
            capabilities: Capabilities::remote(),
            active: AtomicBool::new(true),
        }
    }

    fn sandbox_path(&self, suffix: &str) -> String {
        self.api.url(&format!("/sandboxes/{}{}", self.id, suffix))
    }
}

struct RemoteProcess {
    id: String,
    sandbox_id: String,
    pid: u64,
    api: Arc<Api>,
}

#[async_trait]
impl ProcessHandle for RemoteProcess {
    fn id(&self) -> &str {
        &self.id
    }

    async fn kill(&self) -> SandboxResult<()> {
        let url = self
            .api
            .url(&format!("/sandboxes/{}/processes/{}", self.sandbox_id, self.pid));
        match self.api.send(self.api.client.delete(url)).await {
            Ok(_) | Err(SandboxError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn wait_exit(&self) -> SandboxResult<i32> {
        let url = self.api.url(&format!(
            "/sandboxes/{}/processes/{}/wait",
            self.sandbox_id, self.pid
        ));
        let exit: ProcessExit = self.api.json(self.api.client.post(url)).await?;
        Ok(exit.exit_code)
    }
}

#[async_trait]
impl ExecutionEnvironment for RemoteSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::RemoteSandbox
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn root(&self) -> &str {
        SANDBOX_ROOT
    }

    async fn write_file(&self, path: &str, content: &str) -> SandboxResult<()> {
        self.ensure_active()?;
        let path = validate_path(SANDBOX_ROOT, path)?;
        self.check_size(&path, content)?;
        let request = self
            .api
            .client
            .put(self.sandbox_path("/files"))
            .query(&[("path", join_root(SANDBOX_ROOT, &path))])
            .json(&WriteBody { content });
        self.api.send(request).await?;
        Ok(())
    }

    async fn read_file(&self, path: &str) -> SandboxResult<String> {
        self.ensure_active()?;
        let path = validate_path(SANDBOX_ROOT, path)?;
        let request = self
            .api
            .client
            .get(self.sandbox_path("/files"))
            .query(&[("path", join_root(SANDBOX_ROOT, &path))]);
        match self.api.json::<ReadBody>(request).await {
            Ok(body) => Ok(body.content),
            Err(SandboxError::NotFound(_)) => Err(SandboxError::NotFound(path)),
            Err(e) => Err(e),
        }
    }

    async fn list_files(&self, dir: &str) -> SandboxResult<Vec<FileEntry>> {
        self.ensure_active()?;
        let dir = validate_dir(SANDBOX_ROOT, dir)?;
        let request = self
            .api
            .client
            .get(self.sandbox_path("/files/list"))
            .query(&[("path", join_root(SANDBOX_ROOT, &dir))]);
        let entries: Vec<FileEntry> = self.api.json(request).await?;
        Ok(entries.into_iter().map(relativize).collect())
    }

    async fn delete_file(&self, path: &str) -> SandboxResult<()> {
        self.ensure_active()?;
        let path = validate_path(SANDBOX_ROOT, path)?;
        let request = self
            .api
            .client
            .delete(self.sandbox_path("/files"))
            .query(&[("path", join_root(SANDBOX_ROOT, &path))]);
        self.api.send(request).await?;
        Ok(())
    }

    async fn run_command(
        &self,
        command: &str,
        options: CommandOptions,
    ) -> SandboxResult<CommandOutput> {
        self.ensure_active()?;
        let cwd = match &options.cwd {
            Some(dir) => join_root(SANDBOX_ROOT, &validate_dir(SANDBOX_ROOT, dir)?),
            None => SANDBOX_ROOT.to_string(),
        };
        let timeout = options.timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT);
        let body = CommandBody {
            cmd: command,
            cwd,
            envs: options.env.clone(),
            timeout_ms: timeout.as_millis() as u64,
            background: false,
        };
        let request = self
            .api
            .client
            .post(self.sandbox_path("/commands"))
            .timeout(timeout + TIMEOUT_SLACK)
            .json(&body);

        let output: CommandOutput = match self.api.json(request).await {
            Ok(output) => output,
            Err(SandboxError::Remote(msg))
                if msg.contains("timed out") || msg.contains("HTTP 408") =>
            {
                return Err(SandboxError::Timeout(timeout.as_millis() as u64));
            }
            Err(e) => return Err(e),
        };

        tracing::debug!(
            env = %self.id,
            command,
            exit_code = output.exit_code,
            "remote command finished"
        );
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
        let cmd = std::iter::once(program.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        let body = CommandBody {
            cmd: &cmd,
            cwd: SANDBOX_ROOT.to_string(),
            envs: Default::default(),
            timeout_ms: 0,
            background: true,
        };
        let spawned: SpawnedProcess = self
            .api
            .json(self.api.client.post(self.sandbox_path("/commands")).json(&body))
            .await?;
        Ok(Box::new(RemoteProcess {
            id: format!("{}:{}", self.id, spawned.pid),
            sandbox_id: self.id.clone(),
            pid: spawned.pid,
            api: self.api.clone(),
        }))
    }

    fn server_url(&self, port: u16) -> String {
        preview_url(&self.api.config.domain, &self.id, port)
    }

    async fn start_dev_server(&self, framework: Framework) -> SandboxResult<String> {
        let probe = HttpProbe::new(self.api.client.clone());
        dev_server::launch(self, framework, &probe, &PollPolicy::default()).await
    }

    async fn dispose(&self) -> SandboxResult<()> {
        if !self.active.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        match self.api.send(self.api.client.delete(self.sandbox_path(""))).await {
            Ok(_) | Err(SandboxError::NotFound(_)) => {
                tracing::info!(env = %self.id, "remote sandbox killed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

fn preview_url(domain: &str, id: &str, port: u16) -> String {
    format!("https://{}-{}.{}", port, id, domain)
}

fn relativize(mut entry: FileEntry) -> FileEntry {
    if let Some(rest) = entry.path.strip_prefix(SANDBOX_ROOT) {
        entry.path = rest.trim_start_matches('/').to_string();
    }
    entry
}

/// Creates sandboxes from framework templates and re-attaches by id.
pub struct RemoteSandboxFactory {
    api: Arc<Api>,
}

impl RemoteSandboxFactory {
    pub fn new(client: Client, config: RemoteSandboxConfig) -> Self {
        Self {
            api: Arc::new(Api { client, config }),
        }
    }
}

#[async_trait]
impl EnvironmentFactory for RemoteSandboxFactory {
    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::RemoteSandbox
    }

    async fn create(&self, framework: Framework) -> SandboxResult<Arc<dyn ExecutionEnvironment>> {
        let body = CreateSandboxBody {
            template: framework.template_id(),
        };
        let info: SandboxInfo = self
            .api
            .json(self.api.client.post(self.api.url("/sandboxes")).json(&body))
            .await
            .map_err(|e| SandboxError::provisioning(format!("create sandbox: {}", e)))?;
        tracing::debug!(
            sandbox = %info.sandbox_id,
            template = body.template,
            "remote sandbox created"
        );
        Ok(Arc::new(RemoteSandbox::new(info.sandbox_id, self.api.clone())))
    }

    async fn connect(&self, id: &str) -> SandboxResult<Arc<dyn ExecutionEnvironment>> {
        let info: SandboxInfo = self
            .api
            .json(self.api.client.get(self.api.url(&format!("/sandboxes/{}", id))))
            .await?;
        if matches!(info.state.as_deref(), Some("killed") | Some("stopped")) {
            return Err(SandboxError::provisioning(format!(
                "sandbox {} is {}",
                id,
                info.state.unwrap_or_default()
            )));
        }
        Ok(Arc::new(RemoteSandbox::new(info.sandbox_id, self.api.clone())))
    }
}
