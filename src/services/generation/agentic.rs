//! Tool-Augmented Model Loop
//!
//! One attempt of the generation call: stream the model's answer, run any
//! tool calls it makes, feed the results back, and repeat until the model
//! stops calling tools or the iteration bound is reached. Retries across
//! attempts are the fallback chain's business, not this loop's.

use tokio::sync::mpsc;

use appforge_core::{EventPayload, UnifiedStreamEvent};
use appforge_llm::{
    Attempt, LlmError, LlmRequestOptions, LlmResult, Message, MessageContent, MessageRole,
    ModelCapability, ModelDescriptor, ProviderFactory, ToolDefinition, TransportClass,
};
use appforge_tools::{ToolContext, ToolRegistry};

use crate::services::event_bus::EventBus;

const STREAM_BUFFER: usize = 64;

/// Request shaping for a model on a transport.
pub fn request_options(model: &ModelDescriptor, transport: TransportClass) -> LlmRequestOptions {
    let mut options = LlmRequestOptions::default();
    if model.supports(ModelCapability::ReasoningEffort) {
        options.reasoning_effort_override = Some("medium".to_string());
    }
    if transport == TransportClass::Gateway && model.supports(ModelCapability::ProviderRouting) {
        let mut hints = serde_json::Map::new();
        hints.insert(
            "provider".to_string(),
            serde_json::json!({ "sort": "throughput" }),
        );
        options.provider_hints = Some(hints);
    }
    options
}

/// What one loop run produced.
#[derive(Debug, Clone, Default)]
pub struct LoopOutcome {
    /// Assistant text across all iterations, in order
    pub text: String,
    pub iterations: u32,
    pub tool_calls: usize,
}

/// Drives one attempt of a tool-augmented call.
pub struct AgentLoop<'a> {
    pub factory: &'a dyn ProviderFactory,
    pub registry: &'a ToolRegistry,
    pub tool_ctx: &'a ToolContext,
    pub bus: &'a EventBus,
    pub max_iterations: u32,
    /// Tools offered to the model; empty disables tool use
    pub tools: Vec<ToolDefinition>,
}

impl<'a> AgentLoop<'a> {
    pub async fn run(
        &self,
        attempt: Attempt,
        system: &str,
        mut messages: Vec<Message>,
    ) -> LlmResult<LoopOutcome> {
        let provider = self.factory.create(&attempt.model, attempt.transport)?;
        let mut options = request_options(&attempt.model, attempt.transport);
        if attempt.strip_request_shaping {
            options = options.stripped();
        }
        options.max_steps = Some(self.max_iterations);

        let mut outcome = LoopOutcome::default();
        loop {
            if self.bus.is_cancelled() {
                return Err(LlmError::Other {
                    message: "Run cancelled".to_string(),
                });
            }
            if outcome.iterations >= self.max_iterations {
                tracing::warn!(
                    model = %attempt.model.id,
                    iterations = outcome.iterations,
                    "tool iteration bound reached, keeping partial output"
                );
                return Ok(outcome);
            }
            outcome.iterations += 1;

            let (tx, rx) = mpsc::channel(STREAM_BUFFER);
            let call = provider.stream_message(
                messages.clone(),
                Some(system.to_string()),
                self.tools.clone(),
                tx,
                options.clone(),
            );
            let (response, ()) = tokio::join!(call, self.forward_text(rx));
            let response = response?;

            if let Some(text) = response.content.as_deref().filter(|t| !t.trim().is_empty()) {
                if !outcome.text.is_empty() {
                    outcome.text.push('\n');
                }
                outcome.text.push_str(text);
            }

            if !response.has_tool_calls() {
                return Ok(outcome);
            }

            let mut content = Vec::new();
            if let Some(text) = &response.content {
                content.push(MessageContent::Text { text: text.clone() });
            }
            for tc in &response.tool_calls {
                content.push(MessageContent::ToolUse {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    input: tc.arguments.clone(),
                });
            }
            messages.push(Message {
                role: MessageRole::Assistant,
                content,
            });

            for tc in &response.tool_calls {
                self.bus.queue(EventPayload::ToolCall {
                    tool_id: tc.id.clone(),
                    tool_name: tc.name.clone(),
                    arguments: tc.arguments.clone(),
                });
                let result = self
                    .registry
                    .execute(&tc.name, self.tool_ctx, tc.arguments.clone())
                    .await;
                let output = result.to_content();
                tracing::debug!(tool = %tc.name, success = result.success, "tool executed");
                self.bus.queue(EventPayload::ToolOutput {
                    tool_id: tc.id.clone(),
                    output: output.clone(),
                    is_error: !result.success,
                });
                messages.push(Message::tool_result(&tc.id, output, !result.success));
                outcome.tool_calls += 1;
            }
        }
    }

    /// Relay streamed text to the bus until the provider drops its sender.
    async fn forward_text(&self, mut rx: mpsc::Receiver<UnifiedStreamEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                UnifiedStreamEvent::TextDelta { content } if !content.is_empty() => {
                    self.bus.emit_text(content).await;
                }
                UnifiedStreamEvent::Error { message, .. } => {
                    tracing::warn!(%message, "provider stream reported an error");
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{ScriptedFactory, ScriptedProvider};
    use appforge_core::StreamEvent;
    use appforge_llm::{LlmResponse, ModelCatalog, ToolCall};
    use appforge_sandbox::{EnvironmentFactory, MemoryEnvironmentFactory};
    use appforge_tools::generation_tools;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};
    use tokio_stream::StreamExt;

    fn write_call(id: &str, path: &str) -> LlmResponse {
        let mut response = LlmResponse::text("m", "writing");
        response.tool_calls.push(ToolCall {
            id: id.to_string(),
            name: "createOrUpdateFiles".to_string(),
            arguments: serde_json::json!({
                "files": [{ "path": path, "content": "export default 1;" }]
            }),
        });
        response
    }

    fn attempt() -> Attempt {
        let model = ModelCatalog::default().auxiliary().unwrap();
        Attempt {
            transport: model.default_transport,
            model,
            strip_request_shaping: false,
            number: 1,
        }
    }

    #[tokio::test]
    async fn test_tool_calls_are_executed_and_reported() {
        let provider = ScriptedProvider::new(|messages, _, _| {
            let tool_results = messages
                .iter()
                .flat_map(|m| &m.content)
                .filter(|c| matches!(c, MessageContent::ToolResult { .. }))
                .count();
            Ok(match tool_results {
                0 => write_call("t1", "app/page.tsx"),
                _ => LlmResponse::text("m", "<task_summary>Done</task_summary>"),
            })
        });
        let factory = ScriptedFactory::new(provider.clone());
        let env = MemoryEnvironmentFactory::new()
            .create(appforge_core::Framework::Nextjs)
            .await
            .unwrap();
        let (bus, stream) = EventBus::channel(64);
        let files = Arc::new(Mutex::new(BTreeMap::new()));
        let ctx = ToolContext::new(env, files.clone(), bus.side_sender());
        let registry = generation_tools();

        let agent = AgentLoop {
            factory: &factory,
            registry: &registry,
            tool_ctx: &ctx,
            bus: &bus,
            max_iterations: 8,
            tools: registry.definitions(),
        };
        let outcome = agent
            .run(attempt(), "system", vec![Message::user("build")])
            .await
            .unwrap();
        bus.finish(EventPayload::Status {
            message: "end".to_string(),
        })
        .await;
        drop(ctx);
        drop(bus);

        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.tool_calls, 1);
        assert!(outcome.text.ends_with("<task_summary>Done</task_summary>"));
        assert!(files.lock().unwrap().contains_key("app/page.tsx"));

        let kinds: Vec<&str> = stream
            .collect::<Vec<StreamEvent>>()
            .await
            .iter()
            .map(|e| e.kind())
            .collect();
        assert_eq!(
            kinds,
            vec![
                "text-delta",
                "text-delta",
                "tool-call",
                "file-created",
                "tool-output",
                "status"
            ]
        );
    }

    #[tokio::test]
    async fn test_iteration_bound_keeps_partial_output() {
        let provider = ScriptedProvider::new(|_, _, _| Ok(write_call("t", "a.ts")));
        let factory = ScriptedFactory::new(provider.clone());
        let env = MemoryEnvironmentFactory::new()
            .create(appforge_core::Framework::React)
            .await
            .unwrap();
        let (bus, _stream) = EventBus::channel(256);
        let ctx = ToolContext::new(env, Arc::new(Mutex::new(BTreeMap::new())), bus.side_sender());
        let registry = generation_tools();

        let agent = AgentLoop {
            factory: &factory,
            registry: &registry,
            tool_ctx: &ctx,
            bus: &bus,
            max_iterations: 3,
            tools: registry.definitions(),
        };
        let outcome = agent.run(attempt(), "system", vec![Message::user("x")]).await.unwrap();
        assert_eq!(outcome.iterations, 3);
        assert_eq!(provider.calls(), 3);
    }

    #[test]
    fn test_request_options_follow_capabilities() {
        let catalog = ModelCatalog::default();
        for model in &catalog.models {
            let direct = request_options(model, TransportClass::Direct);
            assert!(direct.provider_hints.is_none());
            assert_eq!(
                direct.reasoning_effort_override.is_some(),
                model.supports(ModelCapability::ReasoningEffort)
            );
            let gateway = request_options(model, TransportClass::Gateway);
            assert!(!gateway.stripped().has_shaping());
        }
    }
}
