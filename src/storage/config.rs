//! TOML Configuration
//!
//! Loads the engine configuration from `config.toml`. Every section has a
//! default, so an empty file (or no file) yields a working in-memory setup.
//! API keys may be supplied through environment variables instead of the file.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use appforge_core::ProxyConfig;
use appforge_llm::{EndpointConfig, ModelCatalog, ModelFamily};
use appforge_sandbox::{EnvironmentKind, RemoteSandboxConfig, DEFAULT_IDLE_TTL};

use crate::utils::error::{EngineError, EngineResult};
use crate::utils::paths::config_path;

/// Environment variable holding the gateway key.
pub const GATEWAY_KEY_VAR: &str = "APPFORGE_GATEWAY_API_KEY";
/// Environment variable holding the remote sandbox key.
pub const SANDBOX_KEY_VAR: &str = "APPFORGE_SANDBOX_API_KEY";
/// Environment variable holding the web search key.
pub const SEARCH_KEY_VAR: &str = "APPFORGE_SEARCH_API_KEY";

const FAMILIES: [ModelFamily; 4] = [
    ModelFamily::OpenAI,
    ModelFamily::Anthropic,
    ModelFamily::Google,
    ModelFamily::Xai,
];

/// Which backend new environments are created on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentSettings {
    pub kind: EnvironmentKind,
    /// Idle time before a cached environment is disposed
    pub idle_ttl_secs: u64,
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            kind: EnvironmentKind::InMemory,
            idle_ttl_secs: DEFAULT_IDLE_TTL.as_secs(),
        }
    }
}

impl EnvironmentSettings {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }
}

/// Bounds of the generation loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub auto_fix_max_attempts: u32,
    /// Trailing history messages included in the context
    pub history_window: usize,
    pub max_tool_iterations: u32,
    pub max_crawl_urls: usize,
    pub crawl_timeout_ms: u64,
    pub research_timeout_ms: u64,
    pub research_max_results: usize,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            auto_fix_max_attempts: 2,
            history_window: 3,
            max_tool_iterations: 8,
            max_crawl_urls: 2,
            crawl_timeout_ms: 8_000,
            research_timeout_ms: 30_000,
            research_max_results: 5,
        }
    }
}

impl GenerationSettings {
    pub fn crawl_timeout(&self) -> Duration {
        Duration::from_millis(self.crawl_timeout_ms)
    }
}

/// Web search used by research subagents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Override of the search API endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Routed multi-provider gateway
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<EndpointConfig>,
    /// Direct endpoints keyed by family name (`openai`, `anthropic`, `google`, `xai`)
    pub direct: HashMap<String, EndpointConfig>,
    pub catalog: ModelCatalog,
    pub environment: EnvironmentSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_sandbox: Option<RemoteSandboxConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchSettings>,
    pub generation: GenerationSettings,
}

impl EngineConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> EngineResult<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file and apply environment key overrides.
    pub fn load(path: &Path) -> EngineResult<Self> {
        let content = fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Load from the default location, falling back to defaults when the file is absent.
    pub fn load_default() -> EngineResult<Self> {
        let path = config_path()?;
        if path.exists() {
            tracing::info!(path = %path.display(), "loading engine config");
            Self::load(&path)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            let mut config = Self::default();
            config.apply_env_overrides(|name| std::env::var(name).ok());
            Ok(config)
        }
    }

    /// Fill API keys from `lookup` (normally the process environment).
    ///
    /// Keys already present in the file win over the environment.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(gateway) = self.gateway.as_mut() {
            if gateway.api_key.is_none() {
                gateway.api_key = lookup(GATEWAY_KEY_VAR);
            }
        }
        for family in FAMILIES {
            let var = family_key_var(family);
            if let Some(endpoint) = self.direct.get_mut(family.as_str()) {
                if endpoint.api_key.is_none() {
                    endpoint.api_key = lookup(&var);
                }
            } else if let Some(key) = lookup(&var) {
                self.direct.insert(
                    family.as_str().to_string(),
                    EndpointConfig::new(
                        appforge_llm::router::default_direct_url(family),
                        Some(key),
                    ),
                );
            }
        }
        if let Some(sandbox) = self.remote_sandbox.as_mut() {
            if sandbox.api_key.is_empty() {
                if let Some(key) = lookup(SANDBOX_KEY_VAR) {
                    sandbox.api_key = key;
                }
            }
        }
        match self.search.as_mut() {
            Some(search) if search.api_key.is_empty() => {
                if let Some(key) = lookup(SEARCH_KEY_VAR) {
                    search.api_key = key;
                }
            }
            Some(_) => {}
            None => {
                self.search = lookup(SEARCH_KEY_VAR).map(|api_key| SearchSettings {
                    api_key,
                    endpoint: None,
                });
            }
        }
    }

    /// Direct endpoints keyed by family. Unknown family names are ignored.
    pub fn direct_endpoints(&self) -> HashMap<ModelFamily, EndpointConfig> {
        FAMILIES
            .iter()
            .filter_map(|family| {
                self.direct
                    .get(family.as_str())
                    .map(|ep| (*family, ep.clone()))
            })
            .collect()
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> EngineResult<()> {
        for name in self.direct.keys() {
            if !FAMILIES.iter().any(|f| f.as_str() == name) {
                return Err(EngineError::config(format!(
                    "unknown model family '{}' in [direct]",
                    name
                )));
            }
        }
        if self.catalog.get(&self.catalog.default_model).is_none() {
            return Err(EngineError::config(format!(
                "default model '{}' is not in the catalog",
                self.catalog.default_model
            )));
        }
        if self.environment.kind == EnvironmentKind::RemoteSandbox
            && self.remote_sandbox.is_none()
        {
            return Err(EngineError::config(
                "remote-sandbox environments need a [remote_sandbox] section",
            ));
        }
        if self.generation.max_tool_iterations == 0 {
            return Err(EngineError::config("max_tool_iterations must be at least 1"));
        }
        Ok(())
    }
}

/// `APPFORGE_<FAMILY>_API_KEY`
fn family_key_var(family: ModelFamily) -> String {
    format!("APPFORGE_{}_API_KEY", family.as_str().to_uppercase())
}
