//! Scripted providers for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use appforge_core::UnifiedStreamEvent;
use appforge_llm::{
    LlmProvider, LlmRequestOptions, LlmResponse, LlmResult, Message, ModelDescriptor,
    ProviderConfig, ProviderFactory, ToolDefinition, TransportClass,
};

type Respond = dyn Fn(&[Message], Option<&str>, &[ToolDefinition]) -> LlmResult<LlmResponse>
    + Send
    + Sync;
type Responder = Arc<Respond>;

/// Provider whose answers come from a closure.
#[derive(Clone)]
pub struct ScriptedProvider {
    responder: Responder,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    config: ProviderConfig,
}

impl ScriptedProvider {
    pub fn new(
        responder: impl Fn(&[Message], Option<&str>, &[ToolDefinition]) -> LlmResult<LlmResponse>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            responder: Arc::new(responder),
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            config: ProviderConfig::default(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn respond(
        &self,
        messages: &[Message],
        system: Option<&str>,
        tools: &[ToolDefinition],
    ) -> LlmResult<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = (self.responder)(messages, system, tools);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn send_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        tools: Vec<ToolDefinition>,
        _request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        self.respond(&messages, system.as_deref(), &tools).await
    }

    async fn stream_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        tools: Vec<ToolDefinition>,
        tx: mpsc::Sender<UnifiedStreamEvent>,
        _request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let response = self.respond(&messages, system.as_deref(), &tools).await?;
        if let Some(content) = &response.content {
            let _ = tx
                .send(UnifiedStreamEvent::TextDelta {
                    content: content.clone(),
                })
                .await;
        }
        Ok(response)
    }

    async fn health_check(&self) -> LlmResult<()> {
        Ok(())
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

/// Factory handing out one scripted provider and recording what was asked for.
pub struct ScriptedFactory {
    provider: ScriptedProvider,
    requested: Mutex<Vec<(String, TransportClass)>>,
}

impl ScriptedFactory {
    pub fn new(provider: ScriptedProvider) -> Self {
        Self {
            provider,
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn requested(&self) -> Vec<(String, TransportClass)> {
        self.requested.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl ProviderFactory for ScriptedFactory {
    fn create(
        &self,
        model: &ModelDescriptor,
        transport: TransportClass,
    ) -> LlmResult<Arc<dyn LlmProvider>> {
        if let Ok(mut requested) = self.requested.lock() {
            requested.push((model.id.clone(), transport));
        }
        Ok(Arc::new(self.provider.clone()))
    }
}
