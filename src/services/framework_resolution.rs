//! Framework Resolution
//!
//! Picks a framework for projects that do not have one yet with a cheap
//! classification call. Answers are cached by a hash of the prompt's first
//! 200 characters; any failure falls back to the default framework.

use std::sync::Arc;
use std::time::Duration;

use mini_moka::sync::Cache;
use sha2::{Digest, Sha256};

use appforge_core::Framework;
use appforge_llm::{LlmRequestOptions, LlmResult, Message, ModelDescriptor, ProviderFactory};

/// Prompt prefix the cache key is derived from.
pub const CACHE_KEY_CHARS: usize = 200;
/// How long a classification is reused.
pub const CACHE_TTL: Duration = Duration::from_secs(30 * 60);
const MAX_CACHE_ENTRIES: u64 = 1_000;

/// How a framework was arrived at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Classified,
    Cached,
    /// Classification failed or gave no usable answer
    Defaulted,
}

/// Classifies prompts into one of [`Framework::ALL`].
pub struct FrameworkResolver {
    factory: Arc<dyn ProviderFactory>,
    cache: Cache<String, Framework>,
}

impl FrameworkResolver {
    pub fn new(factory: Arc<dyn ProviderFactory>) -> Self {
        Self::with_ttl(factory, CACHE_TTL)
    }

    pub fn with_ttl(factory: Arc<dyn ProviderFactory>, ttl: Duration) -> Self {
        Self {
            factory,
            cache: Cache::builder()
                .max_capacity(MAX_CACHE_ENTRIES)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Hex SHA-256 of the first [`CACHE_KEY_CHARS`] characters.
    pub fn cache_key(prompt: &str) -> String {
        let prefix: String = prompt.chars().take(CACHE_KEY_CHARS).collect();
        let digest = Sha256::digest(prefix.as_bytes());
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Resolve a framework for `prompt`. Never fails.
    pub async fn resolve(&self, model: &ModelDescriptor, prompt: &str) -> (Framework, Resolution) {
        let key = Self::cache_key(prompt);
        if let Some(framework) = self.cache.get(&key) {
            tracing::debug!(%framework, "framework classification cache hit");
            return (framework, Resolution::Cached);
        }

        match self.classify(model, prompt).await {
            Ok(Some(framework)) => {
                tracing::info!(%framework, "framework classified");
                self.cache.insert(key, framework);
                (framework, Resolution::Classified)
            }
            Ok(None) => {
                tracing::warn!("classifier named no known framework, using default");
                (Framework::default(), Resolution::Defaulted)
            }
            Err(e) => {
                tracing::warn!(error = %e, "framework classification failed, using default");
                (Framework::default(), Resolution::Defaulted)
            }
        }
    }

    async fn classify(
        &self,
        model: &ModelDescriptor,
        prompt: &str,
    ) -> LlmResult<Option<Framework>> {
        let provider = self.factory.create(model, model.default_transport)?;
        let names: Vec<&str> = Framework::ALL.iter().map(|f| f.as_str()).collect();
        let system = format!(
            "You classify web application requests. Answer with exactly one word from: {}. \
             Pick nextjs unless the request clearly asks for another framework.",
            names.join(", ")
        );
        let response = provider
            .send_message(
                vec![Message::user(prompt)],
                Some(system),
                Vec::new(),
                LlmRequestOptions::default(),
            )
            .await?;
        Ok(response.content.as_deref().and_then(Framework::find_in))
    }
}
