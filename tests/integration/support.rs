//! Shared fixtures: a scripted model provider, build-scripted in-memory
//! environments, and an engine wired to both.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

use appforge::core::{EventPayload, StreamEvent, UnifiedStreamEvent};
use appforge::llm::{
    LlmProvider, LlmRequestOptions, LlmResponse, LlmResult, Message, MessageContent, ModelCatalog,
    ModelDescriptor, ProviderConfig, ProviderFactory, RetryPolicy, ToolCall, ToolDefinition,
    TransportClass,
};
use appforge::sandbox::{
    CommandHandler, CommandOutput, EnvironmentKind, EnvironmentRegistry, MemoryEnvironmentFactory,
    DEFAULT_IDLE_TTL,
};
use appforge::services::web::Crawler;
use appforge::storage::GenerationSettings;
use appforge::{
    EngineDeps, EventStream, GenerationEngine, GenerationRequest, InMemoryProjectStore,
};

/// One model request as the scripted provider sees it.
pub struct Call<'a> {
    pub model: &'a str,
    pub transport: TransportClass,
    pub messages: &'a [Message],
    pub system: Option<&'a str>,
}

impl Call<'_> {
    /// The framework classification request.
    pub fn is_classification(&self) -> bool {
        self.system.is_some_and(|s| s.contains("classify web application requests"))
    }

    /// Whether the newest message is a tool result (the model is mid-loop).
    pub fn after_tool_result(&self) -> bool {
        self.messages.last().is_some_and(|m| {
            m.content
                .iter()
                .any(|c| matches!(c, MessageContent::ToolResult { .. }))
        })
    }

    pub fn last_text(&self) -> String {
        self.messages
            .last()
            .map(|m| m.text_content())
            .unwrap_or_default()
    }
}

type Responder = Arc<dyn Fn(&Call<'_>) -> LlmResult<LlmResponse> + Send + Sync>;

struct ScriptedProvider {
    model: String,
    transport: TransportClass,
    responder: Responder,
    log: Arc<Mutex<Vec<(String, TransportClass)>>>,
    config: ProviderConfig,
}

impl ScriptedProvider {
    fn respond(&self, messages: &[Message], system: Option<&str>) -> LlmResult<LlmResponse> {
        self.log
            .lock()
            .unwrap()
            .push((self.model.clone(), self.transport));
        (self.responder)(&Call {
            model: &self.model,
            transport: self.transport,
            messages,
            system,
        })
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn send_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        _tools: Vec<ToolDefinition>,
        _request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        self.respond(&messages, system.as_deref())
    }

    async fn stream_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        _tools: Vec<ToolDefinition>,
        tx: mpsc::Sender<UnifiedStreamEvent>,
        _request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let response = self.respond(&messages, system.as_deref())?;
        if let Some(content) = response.content.clone().filter(|c| !c.is_empty()) {
            let _ = tx.send(UnifiedStreamEvent::TextDelta { content }).await;
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

/// Factory whose providers answer through one closure.
pub struct ScriptedFactory {
    responder: Responder,
    log: Arc<Mutex<Vec<(String, TransportClass)>>>,
}

impl ScriptedFactory {
    pub fn new(
        responder: impl Fn(&Call<'_>) -> LlmResult<LlmResponse> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Arc::new(responder),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every request made, as (model, transport), in order.
    pub fn calls(&self) -> Vec<(String, TransportClass)> {
        self.log.lock().unwrap().clone()
    }
}

impl ProviderFactory for ScriptedFactory {
    fn create(
        &self,
        model: &ModelDescriptor,
        transport: TransportClass,
    ) -> LlmResult<Arc<dyn LlmProvider>> {
        Ok(Arc::new(ScriptedProvider {
            model: model.id.clone(),
            transport,
            responder: self.responder.clone(),
            log: self.log.clone(),
            config: ProviderConfig::default(),
        }))
    }
}

/// A response that writes `files` through the file tool.
pub fn write_files(files: &[(&str, &str)]) -> LlmResponse {
    let files: Vec<serde_json::Value> = files
        .iter()
        .map(|(path, content)| serde_json::json!({ "path": path, "content": content }))
        .collect();
    let mut response = LlmResponse::text("scripted-model", "Writing the project files.");
    response.tool_calls.push(ToolCall {
        id: "call-1".to_string(),
        name: "createOrUpdateFiles".to_string(),
        arguments: serde_json::json!({ "files": files }),
    });
    response
}

pub fn summary(text: &str) -> LlmResponse {
    LlmResponse::text("scripted-model", format!("<task_summary>{}</task_summary>", text))
}

pub const PAGE: &str = "export default function Page() {\n  return <button onClick={() => alert('Hello')}>Hello world</button>;\n}\n";

/// A model that classifies as nextjs, writes one page, then summarizes.
pub fn builder_model() -> ScriptedFactory {
    ScriptedFactory::new(|call| {
        if call.is_classification() {
            return Ok(LlmResponse::text("scripted-model", "nextjs"));
        }
        if call.after_tool_result() {
            return Ok(summary("A hello world page with an alert button."));
        }
        Ok(write_files(&[("app/page.tsx", PAGE)]))
    })
}

/// Command handler whose build fails `failures` times, then passes.
/// Returns the handler and a counter of build invocations.
pub fn scripted_build(failures: usize) -> (CommandHandler, Arc<AtomicUsize>) {
    let builds = Arc::new(AtomicUsize::new(0));
    let counter = builds.clone();
    let handler: CommandHandler = Arc::new(move |command, _| {
        if !command.contains("run build") {
            return CommandOutput::default();
        }
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= failures {
            CommandOutput {
                stdout: String::new(),
                stderr: "Failed to compile.\n./app/page.tsx:2:11\nType error: Cannot find name 'alrt'."
                    .to_string(),
                exit_code: 1,
            }
        } else {
            CommandOutput {
                stdout: "Compiled successfully".to_string(),
                stderr: String::new(),
                exit_code: 0,
            }
        }
    });
    (handler, builds)
}

/// Engine under test and the collaborators the assertions look at.
pub struct Harness {
    pub engine: GenerationEngine,
    pub store: Arc<InMemoryProjectStore>,
    pub factory: Arc<ScriptedFactory>,
    pub registry: Arc<EnvironmentRegistry>,
    pub environments: Arc<MemoryEnvironmentFactory>,
}

pub struct HarnessBuilder {
    factory: ScriptedFactory,
    environments: MemoryEnvironmentFactory,
    ttl: Duration,
    crawler: Option<Arc<dyn Crawler>>,
    retry_policy: RetryPolicy,
}

impl HarnessBuilder {
    pub fn new(factory: ScriptedFactory) -> Self {
        Self {
            factory,
            environments: MemoryEnvironmentFactory::new(),
            ttl: DEFAULT_IDLE_TTL,
            crawler: None,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn environments(mut self, environments: MemoryEnvironmentFactory) -> Self {
        self.environments = environments;
        self
    }

    pub fn idle_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn crawler(mut self, crawler: Arc<dyn Crawler>) -> Self {
        self.crawler = Some(crawler);
        self
    }

    pub fn fast_retries(mut self) -> Self {
        self.retry_policy = RetryPolicy {
            rate_limit_delay: Duration::from_millis(5),
            server_error_base_delay: Duration::from_millis(1),
        };
        self
    }

    pub fn build(self) -> Harness {
        let environments = Arc::new(self.environments);
        let registry =
            Arc::new(EnvironmentRegistry::with_ttl(self.ttl).with_factory(environments.clone()));
        registry.open();
        let store = Arc::new(InMemoryProjectStore::new());
        let factory = Arc::new(self.factory);
        let engine = GenerationEngine::new(EngineDeps {
            factory: factory.clone(),
            environments: registry.clone(),
            store: store.clone(),
            catalog: Arc::new(ModelCatalog::default()),
            crawler: self.crawler,
            search: None,
            environment_kind: EnvironmentKind::InMemory,
            settings: GenerationSettings::default(),
            retry_policy: self.retry_policy,
        });
        Harness {
            engine,
            store,
            factory,
            registry,
            environments,
        }
    }
}

impl Harness {
    /// Run `request` and gather every event it produced.
    pub async fn run(&self, request: GenerationRequest) -> Vec<StreamEvent> {
        collect(self.engine.run(request)).await
    }
}

pub async fn collect(stream: EventStream) -> Vec<StreamEvent> {
    stream.collect().await
}

pub fn statuses(events: &[StreamEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::Status { message } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

pub fn terminal(events: &[StreamEvent]) -> Vec<&EventPayload> {
    events
        .iter()
        .map(|e| &e.payload)
        .filter(|p| p.is_terminal())
        .collect()
}

/// Files carried by the `complete` event.
pub fn completed_files(events: &[StreamEvent]) -> Option<BTreeMap<String, String>> {
    events.iter().find_map(|e| match &e.payload {
        EventPayload::Complete { files, .. } => Some(files.clone()),
        _ => None,
    })
}
