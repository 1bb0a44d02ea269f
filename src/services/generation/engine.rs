//! Generation Engine
//!
//! Runs one request through the generation state machine:
//! init, framework resolution alongside environment provisioning, context
//! assembly (crawl and research), the tool-augmented generation call,
//! summary extraction, validation with bounded auto-fix, and finalize.
//!
//! Every run streams its progress over an [`EventBus`] and ends with exactly
//! one terminal event: `complete` on success, `error` on a fatal failure.

use std::sync::Arc;
use tokio::time::Instant;

use chrono::Utc;
use tokio::sync::mpsc;

use appforge_core::{EventPayload, Framework};
use appforge_llm::{
    FallbackChain, Message, ModelCatalog, ModelDescriptor, OpenAICompatFactory, ProviderFactory,
    RetryPolicy, GENERATION_MAX_ATTEMPTS,
};
use appforge_sandbox::{
    EnvironmentKind, EnvironmentRegistry, ExecutionEnvironment, MemoryEnvironmentFactory,
    RemoteSandboxFactory,
};
use appforge_tools::{generation_tools, ToolContext, ToolRegistry};

use super::agentic::{AgentLoop, LoopOutcome};
use super::context::{assemble_messages, crawl_prompt_urls, ContextParts};
use super::prompts::{extract_task_summary, fix_prompt, summary_request, system_prompt};
use super::state::{AgentState, RunStage};
use super::validation::{validate, ValidationReport};
use crate::models::{
    Fragment, FragmentMetadata, GenerationOutcome, GenerationRequest, HistoryMessage, HistoryRole,
    Project,
};
use crate::services::budget::{BudgetController, Complexity};
use crate::services::event_bus::{EventBus, EventStream, EVENT_CHANNEL_CAPACITY};
use crate::services::framework_resolution::FrameworkResolver;
use crate::services::research::{
    detect_research_need, findings_context, ResearchDispatcher, SubagentRequest, SubagentStatus,
};
use crate::services::web::{CrawledPage, Crawler, HttpCrawler, TavilySearch, WebSearch};
use crate::storage::config::{EngineConfig, GenerationSettings};
use crate::storage::store::ProjectStore;
use crate::utils::error::{EngineError, EngineResult};

/// Attempts for the summary follow-up call.
const SUMMARY_MAX_ATTEMPTS: u32 = 2;
/// Tool steps allowed in the summary follow-up call.
const SUMMARY_MAX_STEPS: u32 = 2;
/// Summary used when the model never wrote one, in characters.
const FALLBACK_SUMMARY_CHARS: usize = 500;

/// Everything a run depends on, constructed by the embedder.
pub struct EngineDeps {
    pub factory: Arc<dyn ProviderFactory>,
    /// Must be open
    pub environments: Arc<EnvironmentRegistry>,
    pub store: Arc<dyn ProjectStore>,
    pub catalog: Arc<ModelCatalog>,
    pub crawler: Option<Arc<dyn Crawler>>,
    pub search: Option<Arc<dyn WebSearch>>,
    /// Backend new environments are created on
    pub environment_kind: EnvironmentKind,
    pub settings: GenerationSettings,
    pub retry_policy: RetryPolicy,
}

/// The generation engine. Cheap to clone; clones share caches.
#[derive(Clone)]
pub struct GenerationEngine {
    deps: Arc<EngineDeps>,
    tools: Arc<ToolRegistry>,
    resolver: Arc<FrameworkResolver>,
}

impl GenerationEngine {
    pub fn new(deps: EngineDeps) -> Self {
        let resolver = FrameworkResolver::new(deps.factory.clone());
        Self {
            deps: Arc::new(deps),
            tools: Arc::new(generation_tools()),
            resolver: Arc::new(resolver),
        }
    }

    /// Build an engine from configuration: the OpenAI-compatible provider
    /// factory, an opened environment registry, the HTTP crawler, and web
    /// search when a key is configured.
    ///
    /// In-browser environments need a live runtime bridge from the caller and
    /// cannot be configured from a file; build [`EngineDeps`] directly for those.
    pub fn from_config(config: &EngineConfig, store: Arc<dyn ProjectStore>) -> EngineResult<Self> {
        config.validate()?;
        if config.environment.kind == EnvironmentKind::InBrowser {
            return Err(EngineError::config(
                "in-browser environments need a runtime bridge and cannot be configured from a file",
            ));
        }
        let factory = OpenAICompatFactory::new(
            config.direct_endpoints(),
            config.gateway.clone(),
            config.proxy.as_ref(),
        )?;
        let client = appforge_llm::build_http_client(config.proxy.as_ref())?;

        let mut registry = EnvironmentRegistry::with_ttl(config.environment.idle_ttl())
            .with_factory(Arc::new(MemoryEnvironmentFactory::new()));
        if let Some(remote) = &config.remote_sandbox {
            registry = registry.with_factory(Arc::new(RemoteSandboxFactory::new(
                client.clone(),
                remote.clone(),
            )));
        }
        registry.open();

        let search: Option<Arc<dyn WebSearch>> = config
            .search
            .as_ref()
            .filter(|s| !s.api_key.is_empty())
            .map(|s| {
                let search = TavilySearch::new(client.clone(), s.api_key.clone());
                let search = match &s.endpoint {
                    Some(endpoint) => search.with_endpoint(endpoint.clone()),
                    None => search,
                };
                Arc::new(search) as Arc<dyn WebSearch>
            });

        Ok(Self::new(EngineDeps {
            factory: Arc::new(factory),
            environments: Arc::new(registry),
            store,
            catalog: Arc::new(config.catalog.clone()),
            crawler: Some(Arc::new(HttpCrawler::new(appforge_llm::http_client_builder(
                config.proxy.as_ref(),
            )?)?)),
            search,
            environment_kind: config.environment.kind,
            settings: config.generation.clone(),
            retry_policy: RetryPolicy::default(),
        }))
    }

    pub fn deps(&self) -> &EngineDeps {
        &self.deps
    }

    /// Start a run in the background and return its event stream.
    /// Dropping the stream cancels the run at its next stage boundary.
    pub fn run(&self, request: GenerationRequest) -> EventStream {
        let (bus, stream) = EventBus::channel(EVENT_CHANNEL_CAPACITY);
        let engine = self.clone();
        tokio::spawn(async move {
            let _ = engine.execute(&request, &bus).await;
        });
        stream
    }

    /// Run to completion on `bus`, ending it with `complete` or `error`.
    pub async fn execute(
        &self,
        request: &GenerationRequest,
        bus: &EventBus,
    ) -> EngineResult<GenerationOutcome> {
        let started = Instant::now();
        tracing::info!(project = %request.project_id, "generation run started");
        match self.run_stages(request, bus).await {
            Ok(outcome) => {
                tracing::info!(
                    project = %request.project_id,
                    files = outcome.files.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "generation run complete"
                );
                bus.finish(EventPayload::Complete {
                    summary: outcome.summary.clone(),
                    files: outcome.files.clone(),
                    framework: outcome.framework,
                    sandbox_url: outcome.sandbox_url.clone(),
                    warning: outcome.warning.clone(),
                })
                .await;
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(project = %request.project_id, error = %e, "generation run failed");
                bus.finish(EventPayload::Error {
                    message: e.to_string(),
                    code: Some(e.code().to_string()),
                })
                .await;
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        request: &GenerationRequest,
        bus: &EventBus,
    ) -> EngineResult<GenerationOutcome> {
        let mut budget = BudgetController::new();

        // ── init ───────────────────────────────────────────────────────
        enter(&mut budget, bus, RunStage::Init).await?;
        let project = self.deps.store.get_project(&request.project_id).await?;
        let model = self.deps.catalog.resolve(
            request
                .model_preference
                .as_deref()
                .or(project.model_preference.as_deref()),
            &request.prompt,
        )?;
        budget.adapt_budget(Complexity::classify(&request.prompt));
        tracing::debug!(model = %model.id, complexity = ?budget.complexity(), "run initialized");
        budget.end_stage(RunStage::Init.as_str());

        // ── framework resolution + environment provisioning ────────────
        enter(&mut budget, bus, RunStage::EnvironmentProvision).await?;
        bus.status("Preparing the environment").await;
        let (framework, reconnected) = tokio::join!(
            self.resolve_framework(&project, &request.prompt),
            self.reconnect(&project)
        );
        let env = match reconnected {
            Some(env) => env,
            None => self.create_environment(framework).await?,
        };
        let mut state = AgentState::new(framework);
        if project.framework.is_none() {
            if let Err(e) = self
                .deps
                .store
                .update_framework(&project.id, framework)
                .await
            {
                tracing::warn!(
                    project = %project.id,
                    error = %e,
                    "could not store detected framework"
                );
            }
        }
        bus.status(format!("Using {}", framework.display_name())).await;
        budget.end_stage(RunStage::EnvironmentProvision.as_str());

        // ── context assembly ───────────────────────────────────────────
        enter(&mut budget, bus, RunStage::ContextAssembly).await?;
        let skip_research = budget.should_skip_stage(RunStage::ContextAssembly.budget_stage());
        let (crawled, research) = tokio::join!(
            self.crawl(&request.prompt),
            self.research(&model, &request.prompt, skip_research, bus)
        );
        let history = self.history(request).await;
        let messages = assemble_messages(ContextParts {
            crawled: &crawled,
            research: research.as_deref(),
            history: &history,
            history_window: self.deps.settings.history_window,
            prompt: &request.prompt,
        });
        budget.end_stage(RunStage::ContextAssembly.as_str());

        // ── generation ─────────────────────────────────────────────────
        enter(&mut budget, bus, RunStage::Generation).await?;
        bus.status("Generating code").await;
        let system = system_prompt(framework, env.capabilities().can_run_commands());
        let tool_ctx = ToolContext::new(env.clone(), state.files.clone(), bus.side_sender())
            .with_cancellation(bus.cancellation_token());
        let call = ModelCall {
            engine: self,
            model: &model,
            bus,
            tool_ctx: &tool_ctx,
            system: &system,
        };
        let generated = call
            .run(
                messages.clone(),
                GENERATION_MAX_ATTEMPTS,
                self.deps.settings.max_tool_iterations,
            )
            .await?;
        let mut last_output = generated.text.clone();
        if let Some(summary) = extract_task_summary(&generated.text) {
            state.summary = summary;
        }
        budget.end_stage(RunStage::Generation.as_str());

        // ── summary extraction ─────────────────────────────────────────
        if state.summary.is_empty() && state.has_files() {
            enter(&mut budget, bus, RunStage::SummaryExtraction).await?;
            if budget.should_skip_stage(RunStage::SummaryExtraction.budget_stage()) {
                bus.status("Skipping summary: not enough time left").await;
            } else {
                let mut follow_up = messages.clone();
                follow_up.push(Message::assistant(generated.text.clone()));
                follow_up.push(Message::user(summary_request()));
                match call
                    .run(follow_up, SUMMARY_MAX_ATTEMPTS, SUMMARY_MAX_STEPS)
                    .await
                {
                    Ok(outcome) => {
                        state.summary = extract_task_summary(&outcome.text)
                            .unwrap_or_else(|| outcome.text.trim().to_string());
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "summary extraction failed");
                    }
                }
            }
            budget.end_stage(RunStage::SummaryExtraction.as_str());
        }
        if state.summary.is_empty() {
            state.summary = fallback_summary(&generated.text, state.files_snapshot().len());
        }

        // ── validation ─────────────────────────────────────────────────
        enter(&mut budget, bus, RunStage::Validation).await?;
        if state.has_files() {
            bus.status("Validating the build").await;
        }
        let mut report = validate(
            env.clone(),
            framework,
            state.files_snapshot(),
            &last_output,
        )
        .await;
        budget.end_stage(RunStage::Validation.as_str());

        // ── auto-fix ───────────────────────────────────────────────────
        let max_fixes = self.deps.settings.auto_fix_max_attempts;
        let mut fix_error: Option<String> = None;
        if report.needs_fix() && max_fixes > 0 {
            enter(&mut budget, bus, RunStage::AutoFix).await?;
            while report.needs_fix() && state.auto_fix_attempts < max_fixes {
                if budget.should_skip_stage(RunStage::AutoFix.budget_stage()) {
                    bus.status("Skipping auto-fix: not enough time left").await;
                    break;
                }
                if bus.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                state.auto_fix_attempts += 1;
                bus.status(format!(
                    "Auto-fixing build errors (attempt {}/{})",
                    state.auto_fix_attempts, max_fixes
                ))
                .await;

                let mut fix_messages = messages.clone();
                fix_messages.push(Message::assistant(last_output.clone()));
                fix_messages.push(Message::user(fix_prompt(&report.fix_input(&last_output))));
                match call
                    .run(
                        fix_messages,
                        GENERATION_MAX_ATTEMPTS,
                        self.deps.settings.max_tool_iterations,
                    )
                    .await
                {
                    Ok(outcome) => {
                        if let Some(summary) = extract_task_summary(&outcome.text) {
                            state.summary = summary;
                        }
                        last_output = outcome.text;
                    }
                    Err(e) => {
                        tracing::warn!(
                            attempt = state.auto_fix_attempts,
                            error = %e,
                            "auto-fix call failed"
                        );
                        fix_error = Some(e.to_string());
                        break;
                    }
                }

                report =
                    validate(env.clone(), framework, state.files_snapshot(), &last_output).await;
            }
            budget.end_stage(RunStage::AutoFix.as_str());
        }
        let warning = validation_warning(&report, state.auto_fix_attempts, fix_error.as_deref());
        if let Some(warning) = &warning {
            bus.status(warning.clone()).await;
        }

        // ── finalize ───────────────────────────────────────────────────
        enter(&mut budget, bus, RunStage::Finalize).await?;
        let sandbox_url = preview_url(env.as_ref(), framework).await;
        let files = state.files_snapshot();
        self.deps
            .store
            .append_assistant_message(&project.id, &state.summary)
            .await?;
        budget.end_stage(RunStage::Finalize.as_str());

        let fragment = Fragment {
            id: uuid::Uuid::new_v4().to_string(),
            summary: state.summary.clone(),
            files: files.clone(),
            framework,
            sandbox_url: Some(sandbox_url.clone()),
            environment_id: Some(env.id().to_string()),
            metadata: FragmentMetadata {
                model: model.id.clone(),
                validation_warning: warning.clone(),
                auto_fix_attempts: state.auto_fix_attempts,
                stages: budget.stages().to_vec(),
            },
            created_at: Utc::now(),
        };
        let fragment_id = fragment.id.clone();
        self.deps.store.append_fragment(&project.id, fragment).await?;

        Ok(GenerationOutcome {
            summary: state.summary,
            files,
            framework,
            sandbox_url: Some(sandbox_url),
            warning,
            fragment_id,
        })
    }

    /// Stored framework, else a classification call. Never fails.
    async fn resolve_framework(&self, project: &Project, prompt: &str) -> Framework {
        if let Some(framework) = project.framework {
            return framework;
        }
        match self.deps.catalog.auxiliary() {
            Ok(model) => self.resolver.resolve(&model, prompt).await.0,
            Err(e) => {
                tracing::warn!(error = %e, "no auxiliary model for classification, using default");
                Framework::default()
            }
        }
    }

    /// The project's previous environment, if it is still alive. A project
    /// without a stored framework has no environment worth reusing: its
    /// template is only known once detection finishes.
    async fn reconnect(&self, project: &Project) -> Option<Arc<dyn ExecutionEnvironment>> {
        let id = project.environment_id.as_ref()?;
        if project.framework.is_none() {
            return None;
        }
        match self.deps.environments.connect(self.deps.environment_kind, id).await {
            Ok(env) => Some(env),
            Err(e) => {
                tracing::info!(
                    env = %id,
                    error = %e,
                    "previous environment unavailable, creating a new one"
                );
                None
            }
        }
    }

    /// A fresh environment from `framework`'s template.
    async fn create_environment(
        &self,
        framework: Framework,
    ) -> EngineResult<Arc<dyn ExecutionEnvironment>> {
        self.deps
            .environments
            .create(self.deps.environment_kind, framework)
            .await
            .map_err(|e| EngineError::provisioning(e.to_string()))
    }

    async fn crawl(&self, prompt: &str) -> Vec<CrawledPage> {
        match &self.deps.crawler {
            Some(crawler) => {
                crawl_prompt_urls(
                    crawler,
                    prompt,
                    self.deps.settings.max_crawl_urls,
                    self.deps.settings.crawl_timeout(),
                )
                .await
            }
            None => Vec::new(),
        }
    }

    /// Dispatch a research subagent when the prompt calls for one.
    async fn research(
        &self,
        model: &ModelDescriptor,
        prompt: &str,
        skip: bool,
        bus: &EventBus,
    ) -> Option<String> {
        let need = detect_research_need(prompt);
        let task_type = need.task_type.filter(|_| need.needs)?;
        if !model.supports_research {
            tracing::debug!(model = %model.id, "model does not use research, skipping");
            return None;
        }
        if skip {
            bus.status("Skipping research: not enough time left").await;
            return None;
        }
        let auxiliary = match self.deps.catalog.auxiliary() {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "no auxiliary model for research");
                return None;
            }
        };

        let requests = vec![SubagentRequest {
            task_id: format!("{}-1", task_type.as_str()),
            task_type,
            query: need.query,
            max_results: self.deps.settings.research_max_results,
            timeout_ms: self.deps.settings.research_timeout_ms,
        }];
        bus.emit(EventPayload::ResearchStart {
            task_count: requests.len(),
            task_types: requests.iter().map(|r| r.task_type.as_str().to_string()).collect(),
        })
        .await;

        let started = Instant::now();
        let dispatcher = ResearchDispatcher::new(self.deps.factory.clone(), auxiliary)
            .with_search(self.deps.search.clone());
        let responses = dispatcher.spawn_parallel_subagents(&requests).await;
        let completed = responses
            .iter()
            .filter(|r| matches!(r.status, SubagentStatus::Complete | SubagentStatus::Partial))
            .count();
        bus.emit(EventPayload::ResearchComplete {
            completed,
            failed: responses.len() - completed,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
        .await;
        findings_context(&responses)
    }

    /// Request history, or the store's recent messages when the request has none.
    /// A trailing copy of the current prompt is dropped.
    async fn history(&self, request: &GenerationRequest) -> Vec<HistoryMessage> {
        let window = self.deps.settings.history_window;
        let mut history = if request.conversation_history.is_empty() {
            match self
                .deps
                .store
                .recent_messages(&request.project_id, window + 1)
                .await
            {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::warn!(error = %e, "could not load history");
                    Vec::new()
                }
            }
        } else {
            request.conversation_history.clone()
        };
        if history
            .last()
            .is_some_and(|m| {
                m.role == HistoryRole::User && m.content.trim() == request.prompt.trim()
            })
        {
            history.pop();
        }
        history
    }
}

/// One tool-augmented model call under the fallback ladder, with retry
/// notices rendered as status events.
struct ModelCall<'a> {
    engine: &'a GenerationEngine,
    model: &'a ModelDescriptor,
    bus: &'a EventBus,
    tool_ctx: &'a ToolContext,
    system: &'a str,
}

impl ModelCall<'_> {
    async fn run(
        &self,
        messages: Vec<Message>,
        max_attempts: u32,
        max_iterations: u32,
    ) -> EngineResult<LoopOutcome> {
        let deps = &self.engine.deps;
        let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();
        let chain = FallbackChain::new(deps.catalog.clone())
            .with_policy(deps.retry_policy.clone())
            .with_notices(notice_tx);
        let agent = AgentLoop {
            factory: deps.factory.as_ref(),
            registry: self.engine.tools.as_ref(),
            tool_ctx: self.tool_ctx,
            bus: self.bus,
            max_iterations,
            tools: self.engine.tools.definitions(),
        };

        let agent = &agent;
        let messages = &messages;
        let system = self.system;
        let work = chain.run(self.model, max_attempts, move |attempt| {
            agent.run(attempt, system, messages.clone())
        });
        tokio::pin!(work);

        let result = loop {
            tokio::select! {
                biased;
                Some(notice) = notice_rx.recv() => self.bus.status(notice.message()).await,
                result = &mut work => break result,
            }
        };
        while let Ok(notice) = notice_rx.try_recv() {
            self.bus.status(notice.message()).await;
        }
        Ok(result?)
    }
}

/// Open a stage: record it, report progress and remaining time, and stop
/// if the consumer has gone away.
async fn enter(budget: &mut BudgetController, bus: &EventBus, stage: RunStage) -> EngineResult<()> {
    if bus.is_cancelled() {
        tracing::info!(stage = %stage, "run cancelled by consumer");
        return Err(EngineError::Cancelled);
    }
    budget.start_stage(stage.as_str());
    tracing::debug!(stage = %stage, remaining_ms = budget.remaining_ms(), "stage started");
    bus.emit(EventPayload::Progress {
        stage: stage.as_str().to_string(),
        percent: stage.progress(),
    })
    .await;
    let status = budget.check_timeout();
    bus.emit(EventPayload::TimeBudget {
        stage: stage.as_str().to_string(),
        remaining_ms: status.remaining_ms,
        is_warning: status.is_warning,
        is_emergency: status.is_emergency,
        is_critical: status.is_critical,
        message: status.message,
    })
    .await;
    Ok(())
}

/// Dev server URL when the environment can keep one running, else the
/// deterministic port URL.
async fn preview_url(env: &dyn ExecutionEnvironment, framework: Framework) -> String {
    if env.capabilities().supports_background_processes {
        match env.start_dev_server(framework).await {
            Ok(url) => return url,
            Err(e) => {
                tracing::warn!(env = env.id(), error = %e, "dev server did not start");
            }
        }
    }
    env.server_url(framework.dev_port())
}

fn fallback_summary(output: &str, file_count: usize) -> String {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return format!("Generated {} file(s).", file_count);
    }
    match trimmed.char_indices().nth(FALLBACK_SUMMARY_CHARS) {
        Some((byte, _)) => trimmed[..byte].to_string(),
        None => trimmed.to_string(),
    }
}

fn validation_warning(
    report: &ValidationReport,
    attempts: u32,
    fix_error: Option<&str>,
) -> Option<String> {
    if !report.needs_fix() {
        return None;
    }
    let mut warning = format!(
        "Validation still failing after {} auto-fix attempt(s)",
        attempts
    );
    if let Some(error) = fix_error {
        warning.push_str(&format!("; last fix failed: {}", error));
    }
    if let Some(first) = report
        .errors
        .as_deref()
        .and_then(|e| e.lines().find(|l| !l.trim().is_empty()))
    {
        warning.push_str(&format!(": {}", first.trim()));
    }
    Some(warning)
}
