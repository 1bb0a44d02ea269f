//! Tool Trait and Registry
//!
//! Defines the `Tool` trait and the `ToolRegistry` the agentic loop
//! dispatches model tool calls through.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use appforge_core::EventPayload;
use appforge_llm::{ParameterSchema, ToolDefinition};
use appforge_sandbox::ExecutionEnvironment;

use crate::executor::ToolResult;

/// Default per-command timeout for the terminal tool.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Files produced during one run, path to content. Last write wins.
pub type SharedFiles = Arc<Mutex<BTreeMap<String, String>>>;

/// Context handed to each tool call.
///
/// Carries the run's environment, its file map, and the side-event queue
/// tool activity is reported through.
#[derive(Clone)]
pub struct ToolContext {
    pub env: Arc<dyn ExecutionEnvironment>,
    pub files: SharedFiles,
    /// Side events (`file-created` and friends), flushed by the event bus
    pub side_events: mpsc::UnboundedSender<EventPayload>,
    pub cancellation_token: CancellationToken,
    pub command_timeout: Duration,
}

impl ToolContext {
    pub fn new(
        env: Arc<dyn ExecutionEnvironment>,
        files: SharedFiles,
        side_events: mpsc::UnboundedSender<EventPayload>,
    ) -> Self {
        Self {
            env,
            files,
            side_events,
            cancellation_token: CancellationToken::new(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Queue a side event. A closed queue means the consumer is gone; drop it.
    pub fn emit(&self, payload: EventPayload) {
        let _ = self.side_events.send(payload);
    }

    /// Record a produced file in the run's file map under its validated,
    /// root-relative path.
    pub fn record_file(&self, path: &str, content: &str) {
        if let Ok(mut files) = self.files.lock() {
            files.insert(path.to_string(), content.to_string());
        }
    }

    /// Snapshot of the run's file map.
    pub fn files_snapshot(&self) -> BTreeMap<String, String> {
        self.files
            .lock()
            .map(|files| files.clone())
            .unwrap_or_default()
    }
}

/// Parse tool arguments into their typed form, or explain what was wrong.
pub fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, ToolResult> {
    serde_json::from_value(args)
        .map_err(|e| ToolResult::err(format!("Invalid arguments for {}: {}", tool, e)))
}

/// Unified tool interface.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model calls this tool by
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema describing the tool's input parameters
    fn parameters_schema(&self) -> ParameterSchema;

    async fn execute(&self, ctx: &ToolContext, args: Value) -> ToolResult;
}

/// Registry of available tools, iterated in registration order.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a tool. If a tool with the same name already exists, it is replaced.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(name, tool);
    }

    /// Unregister a tool by name. Returns the removed tool, or None if not found.
    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        self.order.retain(|n| n != name);
        self.tools.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Tool definitions for the provider, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.parameters_schema(),
            })
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool by name. Unknown names produce an error result, not a panic.
    pub async fn execute(&self, name: &str, ctx: &ToolContext, args: Value) -> ToolResult {
        if ctx.cancellation_token.is_cancelled() {
            return ToolResult::err("Run cancelled");
        }
        match self.tools.get(name) {
            Some(tool) => tool.execute(ctx, args).await,
            None => ToolResult::err(format!("Unknown tool: {}", name)),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
