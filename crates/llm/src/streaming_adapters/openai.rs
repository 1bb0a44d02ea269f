//! OpenAI-Compatible SSE Adapter
//!
//! Handles the chat-completions SSE format spoken by OpenAI and by the
//! OpenAI-compatible endpoints of other families and the gateway, including
//! `reasoning_content` deltas.

use appforge_core::streaming::{AdapterError, StreamAdapter, UnifiedStreamEvent};
use serde::Deserialize;

/// Internal event types from the SSE format
#[derive(Debug, Deserialize)]
struct ChunkEvent {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    #[serde(default)]
    reasoning_tokens: Option<u32>,
}

/// Adapter for OpenAI-compatible SSE streams
pub struct OpenAIAdapter {
    provider: &'static str,
    /// Track tool calls being accumulated
    tool_id: Option<String>,
    tool_name: Option<String>,
    tool_args_buffer: String,
}

impl OpenAIAdapter {
    pub fn new() -> Self {
        Self::named("openai")
    }

    /// Adapter reporting a different provider name (gateway, family endpoints).
    pub fn named(provider: &'static str) -> Self {
        Self {
            provider,
            tool_id: None,
            tool_name: None,
            tool_args_buffer: String::new(),
        }
    }

    /// Flush any pending tool call, emitting a ToolComplete event
    fn flush_pending_tool(&mut self) -> Option<UnifiedStreamEvent> {
        if let (Some(id), Some(name)) = (self.tool_id.take(), self.tool_name.take()) {
            let args = std::mem::take(&mut self.tool_args_buffer);
            Some(UnifiedStreamEvent::ToolComplete {
                tool_id: id,
                tool_name: name,
                arguments: args,
            })
        } else {
            None
        }
    }
}

impl Default for OpenAIAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAdapter for OpenAIAdapter {
    fn provider_name(&self) -> &'static str {
        self.provider
    }

    fn adapt(&mut self, input: &str) -> Result<Vec<UnifiedStreamEvent>, AdapterError> {
        let trimmed = input.trim();

        // SSE comments (": keep-alive") and event names carry no payload
        if trimmed.is_empty() || trimmed.starts_with(':') || trimmed.starts_with("event:") {
            return Ok(vec![]);
        }

        let json_str = trimmed
            .strip_prefix("data:")
            .map(str::trim_start)
            .unwrap_or(trimmed);

        if json_str.is_empty() || json_str == "[DONE]" {
            return Ok(self.flush_pending_tool().into_iter().collect());
        }

        let event: ChunkEvent =
            serde_json::from_str(json_str).map_err(|e| AdapterError::ParseError(e.to_string()))?;

        let mut events = vec![];

        if let Some(err) = event.error {
            events.push(UnifiedStreamEvent::Error {
                message: err.message,
                code: err.code.map(|c| match c {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                }),
            });
            return Ok(events);
        }

        if let Some(usage) = event.usage {
            events.push(UnifiedStreamEvent::Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                thinking_tokens: usage.reasoning_tokens,
            });
        }

        for choice in event.choices {
            if let Some(delta) = choice.delta {
                if let Some(reasoning) = delta.reasoning_content.filter(|r| !r.is_empty()) {
                    events.push(UnifiedStreamEvent::ThinkingDelta { content: reasoning });
                }

                if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                    events.push(UnifiedStreamEvent::TextDelta { content });
                }

                for tc in delta.tool_calls.unwrap_or_default() {
                    if let Some(id) = tc.id {
                        // New tool call starting, flush the previous one
                        if let Some(tool_event) = self.flush_pending_tool() {
                            events.push(tool_event);
                        }
                        self.tool_id = Some(id.clone());
                        self.tool_name = tc.function.as_ref().and_then(|f| f.name.clone());
                        self.tool_args_buffer.clear();

                        if let Some(name) = &self.tool_name {
                            events.push(UnifiedStreamEvent::ToolStart {
                                tool_id: id,
                                tool_name: name.clone(),
                            });
                        }
                    }

                    if let Some(args) = tc.function.and_then(|f| f.arguments) {
                        self.tool_args_buffer.push_str(&args);
                    }
                }
            }

            // Some servers put the final delta and finish_reason in the same chunk
            if let Some(finish_reason) = choice.finish_reason {
                if let Some(tool_event) = self.flush_pending_tool() {
                    events.push(tool_event);
                }
                events.push(UnifiedStreamEvent::Complete {
                    stop_reason: Some(finish_reason),
                });
            }
        }

        Ok(events)
    }

    fn reset(&mut self) {
        self.tool_id = None;
        self.tool_name = None;
        self.tool_args_buffer.clear();
    }
}
