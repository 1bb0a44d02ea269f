//! Dev Server Startup
//!
//! Starts a framework's dev server as a background process and polls until it
//! answers. A server that never answers is not an error: the deterministic
//! preview URL is returned anyway, since slow first compiles are common.

use std::time::Duration;

use async_trait::async_trait;

use appforge_core::Framework;

use crate::environment::ExecutionEnvironment;
use crate::error::{SandboxError, SandboxResult};

/// Default interval between readiness polls.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Default number of readiness polls.
pub const MAX_POLLS: u32 = 60;

/// Decides whether a dev server URL is answering.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn is_ready(&self, url: &str) -> bool;
}

/// Probe that issues an HTTP GET; any response below 500 counts as ready.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ReadinessProbe for HttpProbe {
    async fn is_ready(&self, url: &str) -> bool {
        match self
            .client
            .get(url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
        {
            Ok(resp) => !resp.status().is_server_error(),
            Err(_) => false,
        }
    }
}

/// Polling schedule.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_polls: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: POLL_INTERVAL,
            max_polls: MAX_POLLS,
        }
    }
}

/// Start `framework`'s dev server in `env` and wait for it.
pub async fn launch<E>(
    env: &E,
    framework: Framework,
    probe: &dyn ReadinessProbe,
    policy: &PollPolicy,
) -> SandboxResult<String>
where
    E: ExecutionEnvironment + ?Sized,
{
    if !env.capabilities().supports_background_processes {
        return Err(SandboxError::unsupported(env.kind(), "start_dev_server"));
    }

    let port = framework.dev_port();
    let url = env.server_url(port);

    if probe.is_ready(&url).await {
        tracing::debug!(env = env.id(), %url, "dev server already running");
        return Ok(url);
    }

    let (program, args) = framework.dev_command();
    let process = env.spawn_process(program, &args).await?;
    tracing::info!(
        env = env.id(),
        framework = %framework,
        process = process.id(),
        "dev server starting"
    );

    for poll in 1..=policy.max_polls {
        tokio::time::sleep(policy.interval).await;
        if probe.is_ready(&url).await {
            tracing::info!(env = env.id(), %url, polls = poll, "dev server ready");
            return Ok(url);
        }
    }

    tracing::warn!(
        env = env.id(),
        %url,
        polls = policy.max_polls,
        "dev server did not answer, returning preview url anyway"
    );
    Ok(url)
}
