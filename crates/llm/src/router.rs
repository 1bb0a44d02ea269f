//! Provider Routing
//!
//! Maps a (model, transport) pair to a ready provider client.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use appforge_core::proxy::ProxyConfig;

use crate::http_client::build_http_client;
use crate::models::{ModelDescriptor, ModelFamily, TransportClass};
use crate::openai::OpenAICompatProvider;
use crate::provider::LlmProvider;
use crate::types::{LlmError, LlmResult, ProviderConfig};

/// Builds provider clients for the fallback ladder.
pub trait ProviderFactory: Send + Sync {
    fn create(
        &self,
        model: &ModelDescriptor,
        transport: TransportClass,
    ) -> LlmResult<Arc<dyn LlmProvider>>;
}

/// One chat-completions endpoint and its key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl EndpointConfig {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
        }
    }
}

/// Default direct endpoint for a family (OpenAI-compatible surface).
pub fn default_direct_url(family: ModelFamily) -> &'static str {
    match family {
        ModelFamily::OpenAI => "https://api.openai.com/v1/chat/completions",
        ModelFamily::Anthropic => "https://api.anthropic.com/v1/chat/completions",
        ModelFamily::Google => {
            "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions"
        }
        ModelFamily::Xai => "https://api.x.ai/v1/chat/completions",
    }
}

/// Factory building `OpenAICompatProvider`s over one shared HTTP client.
pub struct OpenAICompatFactory {
    direct: HashMap<ModelFamily, EndpointConfig>,
    gateway: Option<EndpointConfig>,
    client: reqwest::Client,
    max_tokens: u32,
}

impl OpenAICompatFactory {
    pub fn new(
        direct: HashMap<ModelFamily, EndpointConfig>,
        gateway: Option<EndpointConfig>,
        proxy: Option<&ProxyConfig>,
    ) -> LlmResult<Self> {
        Ok(Self {
            direct,
            gateway,
            client: build_http_client(proxy)?,
            max_tokens: 8192,
        })
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn endpoint(
        &self,
        model: &ModelDescriptor,
        transport: TransportClass,
    ) -> LlmResult<(String, EndpointConfig)> {
        match transport {
            TransportClass::Gateway => self
                .gateway
                .clone()
                .map(|ep| ("gateway".to_string(), ep))
                .ok_or_else(|| LlmError::ProviderUnavailable {
                    message: "no gateway endpoint configured".to_string(),
                }),
            TransportClass::Direct => {
                let ep = self.direct.get(&model.family).cloned().unwrap_or_else(|| {
                    EndpointConfig::new(default_direct_url(model.family), None)
                });
                Ok((model.family.as_str().to_string(), ep))
            }
        }
    }
}

impl ProviderFactory for OpenAICompatFactory {
    fn create(
        &self,
        model: &ModelDescriptor,
        transport: TransportClass,
    ) -> LlmResult<Arc<dyn LlmProvider>> {
        let (name, endpoint) = self.endpoint(model, transport)?;
        let config = ProviderConfig {
            name,
            api_key: endpoint.api_key,
            base_url: endpoint.base_url,
            model: model.wire_name(transport),
            max_tokens: self.max_tokens,
            temperature: model.temperature,
            ..Default::default()
        };
        tracing::debug!(provider = %config.name, model = %config.model, "creating provider");
        Ok(Arc::new(OpenAICompatProvider::with_client(
            config,
            self.client.clone(),
        )))
    }
}
