//! Model Catalogue
//!
//! The static table of logical models the engine can drive, and the
//! priority-ordered keyword rules used to pick one when the caller asks
//! for `"auto"`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::{LlmError, LlmResult};

/// Logical id that requests rule-based selection.
pub const AUTO_MODEL: &str = "auto";

/// How a model call reaches its provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportClass {
    /// The model family's own endpoint
    Direct,
    /// The routed multi-provider gateway
    Gateway,
}

impl std::fmt::Display for TransportClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportClass::Direct => write!(f, "direct"),
            TransportClass::Gateway => write!(f, "gateway"),
        }
    }
}

/// Provider family a model belongs to. Selects the direct endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    OpenAI,
    Anthropic,
    Google,
    Xai,
}

impl ModelFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::OpenAI => "openai",
            ModelFamily::Anthropic => "anthropic",
            ModelFamily::Google => "google",
            ModelFamily::Xai => "xai",
        }
    }
}

/// Optional request features a model accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelCapability {
    ReasoningEffort,
    ProviderRouting,
    ParallelToolCalls,
}

/// One row of the model table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Logical id, also the wire model name on the direct transport
    pub id: String,
    pub family: ModelFamily,
    /// Transport used for the first attempt
    pub default_transport: TransportClass,
    pub temperature: f32,
    #[serde(default)]
    pub capabilities: BTreeSet<ModelCapability>,
    #[serde(default)]
    pub supports_research: bool,
    /// Whether the gateway can serve this model after a direct rate limit
    #[serde(default)]
    pub gateway_fallback: bool,
    /// Wire model name on the gateway, e.g. `anthropic/claude-sonnet-4`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_id: Option<String>,
    /// Family alternate used once both transports are rate limited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_model: Option<String>,
}

impl ModelDescriptor {
    /// Wire model name for the given transport.
    pub fn wire_name(&self, transport: TransportClass) -> String {
        match transport {
            TransportClass::Direct => self.id.clone(),
            TransportClass::Gateway => self
                .gateway_id
                .clone()
                .unwrap_or_else(|| format!("{}/{}", self.family.as_str(), self.id)),
        }
    }

    pub fn supports(&self, capability: ModelCapability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Whether a rate limit on `transport` may move the call to the gateway.
    pub fn can_switch_to_gateway(&self, transport: TransportClass) -> bool {
        transport == TransportClass::Direct && self.gateway_fallback
    }
}

/// A keyword rule for `"auto"` model selection. First match wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionRule {
    pub model: String,
    /// Lowercase substrings; any one matching selects `model`
    pub keywords: Vec<String>,
}

/// Model table plus selection rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelCatalog {
    pub models: Vec<ModelDescriptor>,
    pub rules: Vec<SelectionRule>,
    /// Used for `"auto"` when no rule matches, and for unknown ids
    pub default_model: String,
    /// Cheap model for research subagents and framework classification
    pub auxiliary_model: String,
}

fn descriptor(
    id: &str,
    family: ModelFamily,
    temperature: f32,
    capabilities: &[ModelCapability],
    supports_research: bool,
    fallback_model: Option<&str>,
) -> ModelDescriptor {
    ModelDescriptor {
        id: id.to_string(),
        family,
        default_transport: TransportClass::Direct,
        temperature,
        capabilities: capabilities.iter().copied().collect(),
        supports_research,
        gateway_fallback: true,
        gateway_id: None,
        fallback_model: fallback_model.map(str::to_string),
    }
}

fn rule(model: &str, keywords: &[&str]) -> SelectionRule {
    SelectionRule {
        model: model.to_string(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        use ModelCapability::*;
        Self {
            models: vec![
                descriptor(
                    "claude-sonnet-4",
                    ModelFamily::Anthropic,
                    0.3,
                    &[ProviderRouting],
                    true,
                    Some("claude-3-5-haiku"),
                ),
                descriptor(
                    "claude-3-5-haiku",
                    ModelFamily::Anthropic,
                    0.3,
                    &[ProviderRouting],
                    true,
                    None,
                ),
                descriptor(
                    "gpt-4.1",
                    ModelFamily::OpenAI,
                    0.3,
                    &[ProviderRouting, ParallelToolCalls],
                    true,
                    Some("gpt-4.1-mini"),
                ),
                descriptor(
                    "gpt-4.1-mini",
                    ModelFamily::OpenAI,
                    0.3,
                    &[ProviderRouting, ParallelToolCalls],
                    true,
                    None,
                ),
                descriptor(
                    "o3-mini",
                    ModelFamily::OpenAI,
                    1.0,
                    &[ReasoningEffort, ProviderRouting],
                    false,
                    Some("gpt-4.1"),
                ),
                descriptor(
                    "gemini-2.5-pro",
                    ModelFamily::Google,
                    0.4,
                    &[ProviderRouting],
                    true,
                    Some("gemini-2.5-flash"),
                ),
                descriptor(
                    "gemini-2.5-flash",
                    ModelFamily::Google,
                    0.4,
                    &[ProviderRouting],
                    true,
                    None,
                ),
                descriptor(
                    "grok-3",
                    ModelFamily::Xai,
                    0.4,
                    &[ProviderRouting],
                    false,
                    None,
                ),
            ],
            rules: vec![
                rule(
                    "o3-mini",
                    &["algorithm", "optimize", "complex logic", "data structure"],
                ),
                rule(
                    "gemini-2.5-pro",
                    &["dashboard", "data visualization", "chart", "analytics"],
                ),
                rule(
                    "gpt-4.1-mini",
                    &["landing page", "simple", "static page", "portfolio"],
                ),
            ],
            default_model: "claude-sonnet-4".to_string(),
            auxiliary_model: "gemini-2.5-flash".to_string(),
        }
    }
}

impl ModelCatalog {
    /// Look up a descriptor by logical id.
    pub fn get(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == id)
    }

    /// Apply the selection rules to a prompt. Always returns a model id.
    pub fn select_for_prompt(&self, prompt: &str) -> &str {
        let lower = prompt.to_lowercase();
        self.rules
            .iter()
            .find(|r| r.keywords.iter().any(|k| lower.contains(k.as_str())))
            .map(|r| r.model.as_str())
            .unwrap_or(self.default_model.as_str())
    }

    /// Resolve a caller's model preference to a descriptor.
    ///
    /// `None` and `"auto"` go through the selection rules; unknown ids fall
    /// back to the default model.
    pub fn resolve(&self, preference: Option<&str>, prompt: &str) -> LlmResult<ModelDescriptor> {
        let id = match preference.map(str::trim).filter(|p| !p.is_empty()) {
            None => self.select_for_prompt(prompt),
            Some(p) if p.eq_ignore_ascii_case(AUTO_MODEL) => self.select_for_prompt(prompt),
            Some(p) => p,
        };

        if let Some(found) = self.get(id) {
            return Ok(found.clone());
        }

        tracing::warn!(
            requested = id,
            default = %self.default_model,
            "unknown model id, using default"
        );
        self.get(&self.default_model)
            .cloned()
            .ok_or_else(|| LlmError::ModelNotFound {
                model: self.default_model.clone(),
            })
    }

    /// Descriptor for research subagents and classification calls.
    pub fn auxiliary(&self) -> LlmResult<ModelDescriptor> {
        self.get(&self.auxiliary_model)
            .filter(|m| m.supports_research)
            .or_else(|| self.models.iter().find(|m| m.supports_research))
            .cloned()
            .ok_or_else(|| LlmError::ModelNotFound {
                model: self.auxiliary_model.clone(),
            })
    }
}
