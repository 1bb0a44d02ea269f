//! OpenAI-Compatible Provider
//!
//! Implementation of the LlmProvider trait for any chat-completions endpoint
//! speaking the OpenAI wire format. Used for direct family endpoints and for
//! the routed gateway; the only difference between the two is the base URL,
//! the key, and the wire model name.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;

use super::provider::{missing_api_key_error, parse_http_error, LlmProvider};
use super::types::{
    LlmError, LlmRequestOptions, LlmResponse, LlmResult, Message, MessageContent, MessageRole,
    ProviderConfig, StopReason, ToolCall, ToolCallMode, ToolDefinition, UsageStats,
};
use crate::http_client::build_http_client;
use crate::streaming_adapters::OpenAIAdapter;
use appforge_core::streaming::{StreamAdapter, UnifiedStreamEvent};

/// OpenAI-compatible chat-completions provider
pub struct OpenAICompatProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OpenAICompatProvider {
    /// Create a provider with its own HTTP client.
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        let client = build_http_client(config.proxy.as_ref())?;
        Ok(Self { config, client })
    }

    /// Create a provider sharing an existing HTTP client.
    pub fn with_client(config: ProviderConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    /// Reasoning models reject `temperature` and accept `reasoning_effort`.
    fn model_supports_reasoning(&self) -> bool {
        let model = self.config.model.rsplit('/').next().unwrap_or_default();
        let model = model.to_lowercase();
        model.starts_with("o1") || model.starts_with("o3") || model.starts_with("o4")
    }

    /// Build the request body for the API
    fn build_request_body(
        &self,
        messages: &[Message],
        system: Option<&str>,
        tools: &[ToolDefinition],
        stream: bool,
        request_options: &LlmRequestOptions,
    ) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "stream": stream,
        });

        if self.model_supports_reasoning() {
            if let Some(effort) = request_options
                .reasoning_effort_override
                .as_ref()
                .or(self.config.reasoning_effort.as_ref())
            {
                body["reasoning_effort"] = serde_json::json!(effort);
            }
        } else {
            body["temperature"] = serde_json::json!(request_options
                .temperature_override
                .unwrap_or(self.config.temperature));
        }

        let mut wire_messages: Vec<serde_json::Value> = Vec::new();
        if let Some(sys) = system {
            wire_messages.push(serde_json::json!({
                "role": "system",
                "content": sys
            }));
        }
        for msg in messages {
            wire_messages.extend(self.message_to_wire(msg));
        }
        body["messages"] = serde_json::json!(wire_messages);

        if !tools.is_empty() && request_options.tool_call_mode != ToolCallMode::None {
            let wire_tools: Vec<serde_json::Value> =
                tools.iter().map(|t| self.tool_to_wire(t)).collect();
            body["tools"] = serde_json::json!(wire_tools);
            if request_options.tool_call_mode == ToolCallMode::Required {
                body["tool_choice"] = serde_json::json!("required");
            }
        }

        if stream {
            body["stream_options"] = serde_json::json!({
                "include_usage": true
            });
        }

        if let Some(hints) = &request_options.provider_hints {
            for (key, value) in hints {
                body[key.as_str()] = value.clone();
            }
        }

        body
    }

    /// Convert a Message to wire format.
    ///
    /// Tool results become one `tool` message each, so a single Message may
    /// expand to several wire messages.
    fn message_to_wire(&self, message: &Message) -> Vec<serde_json::Value> {
        let role = match message.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        };

        let tool_results: Vec<serde_json::Value> = message
            .content
            .iter()
            .filter_map(|c| match c {
                MessageContent::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => Some(serde_json::json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": content,
                })),
                _ => None,
            })
            .collect();
        if !tool_results.is_empty() {
            return tool_results;
        }

        let text_content = message.text_content();
        let tool_calls: Vec<serde_json::Value> = message
            .content
            .iter()
            .filter_map(|c| match c {
                MessageContent::ToolUse { id, name, input } => Some(serde_json::json!({
                    "id": id,
                    "type": "function",
                    "function": {
                        "name": name,
                        "arguments": input.to_string()
                    }
                })),
                _ => None,
            })
            .collect();

        if tool_calls.is_empty() {
            return vec![serde_json::json!({
                "role": role,
                "content": text_content
            })];
        }

        // Always include content; some compatible servers require the field
        let content = if text_content.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::json!(text_content)
        };
        vec![serde_json::json!({
            "role": role,
            "content": content,
            "tool_calls": tool_calls
        })]
    }

    /// Convert a ToolDefinition to wire format
    fn tool_to_wire(&self, tool: &ToolDefinition) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.input_schema
            }
        })
    }

    fn post(&self, body: &serde_json::Value) -> LlmResult<reqwest::RequestBuilder> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| missing_api_key_error(&self.config.name))?;

        let mut request = self
            .client
            .post(&self.config.base_url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json");
        for (name, value) in &self.config.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        Ok(request.json(body))
    }

    /// Parse a non-streaming response
    fn parse_response(&self, response: &ChatResponse) -> LlmResponse {
        let choice = response.choices.first();

        let mut content = None;
        let mut thinking = None;
        let mut tool_calls = Vec::new();

        if let Some(msg) = choice.and_then(|c| c.message.as_ref()) {
            content = msg.content.clone();
            thinking = msg.reasoning_content.clone();

            for tc in msg.tool_calls.iter().flatten() {
                let arguments: serde_json::Value = serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(serde_json::Value::Null);
                tool_calls.push(ToolCall {
                    id: tc.id.clone(),
                    name: tc.function.name.clone(),
                    arguments,
                });
            }
        }

        let stop_reason = choice
            .and_then(|c| c.finish_reason.as_ref())
            .map(|r| StopReason::from(r.as_str()))
            .unwrap_or(StopReason::EndTurn);

        let usage = response
            .usage
            .as_ref()
            .map(|u| UsageStats {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
                thinking_tokens: u.reasoning_tokens,
            })
            .unwrap_or_default();

        LlmResponse {
            content,
            thinking,
            tool_calls,
            stop_reason,
            usage,
            model: response
                .model
                .clone()
                .unwrap_or_else(|| self.config.model.clone()),
        }
    }

    /// Health check URL: the `models` listing next to the completions endpoint.
    fn models_url(&self) -> String {
        match self.config.base_url.strip_suffix("/chat/completions") {
            Some(prefix) => format!("{}/models", prefix),
            None => self.config.base_url.clone(),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAICompatProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn send_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        tools: Vec<ToolDefinition>,
        request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let body = self.build_request_body(
            &messages,
            system.as_deref(),
            &tools,
            false,
            &request_options,
        );

        let response = self
            .post(&body)?
            .send()
            .await
            .map_err(|e| LlmError::NetworkError {
                message: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let body_text = response.text().await.map_err(|e| LlmError::NetworkError {
            message: e.to_string(),
        })?;

        if status != 200 {
            return Err(parse_http_error(status, &body_text, &self.config.name));
        }

        let parsed: ChatResponse =
            serde_json::from_str(&body_text).map_err(|e| LlmError::ParseError {
                message: format!("Failed to parse response: {}", e),
            })?;

        Ok(self.parse_response(&parsed))
    }

    async fn stream_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        tools: Vec<ToolDefinition>,
        tx: mpsc::Sender<UnifiedStreamEvent>,
        request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let body =
            self.build_request_body(&messages, system.as_deref(), &tools, true, &request_options);

        let response = self
            .post(&body)?
            .send()
            .await
            .map_err(|e| LlmError::NetworkError {
                message: e.to_string(),
            })?;

        let status = response.status().as_u16();
        if status != 200 {
            let body_text = response.text().await.map_err(|e| LlmError::NetworkError {
                message: e.to_string(),
            })?;
            return Err(parse_http_error(status, &body_text, &self.config.name));
        }

        let mut adapter = OpenAIAdapter::new();
        let mut accumulated_content = String::new();
        let mut accumulated_thinking = String::new();
        let mut tool_calls = Vec::new();
        let mut usage = UsageStats::default();
        let mut stop_reason = StopReason::EndTurn;

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::NetworkError {
                message: e.to_string(),
            })?;

            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(line_end) = buffer.find('\n') {
                let line: String = buffer.drain(..=line_end).collect();
                if line.trim().is_empty() {
                    continue;
                }

                let events = match adapter.adapt(&line) {
                    Ok(events) => events,
                    Err(e) => {
                        tracing::debug!(
                            provider = %self.config.name,
                            error = %e,
                            "skipping malformed stream line"
                        );
                        continue;
                    }
                };

                for event in events {
                    match &event {
                        UnifiedStreamEvent::TextDelta { content } => {
                            accumulated_content.push_str(content);
                        }
                        UnifiedStreamEvent::ThinkingDelta { content } => {
                            accumulated_thinking.push_str(content);
                        }
                        UnifiedStreamEvent::ToolComplete {
                            tool_id,
                            tool_name,
                            arguments,
                        } => {
                            let input = serde_json::from_str(arguments)
                                .unwrap_or(serde_json::Value::Object(Default::default()));
                            tool_calls.push(ToolCall {
                                id: tool_id.clone(),
                                name: tool_name.clone(),
                                arguments: input,
                            });
                        }
                        UnifiedStreamEvent::Usage {
                            input_tokens,
                            output_tokens,
                            thinking_tokens,
                        } => {
                            usage.input_tokens = *input_tokens;
                            usage.output_tokens = *output_tokens;
                            usage.thinking_tokens = *thinking_tokens;
                        }
                        UnifiedStreamEvent::Complete {
                            stop_reason: Some(reason),
                        } => {
                            stop_reason = StopReason::from(reason.as_str());
                        }
                        UnifiedStreamEvent::Error { message, .. } => {
                            // Mid-stream errors surface through the same classification
                            // path as HTTP errors.
                            return Err(LlmError::Other {
                                message: format!("{}: {}", self.config.name, message),
                            });
                        }
                        _ => {}
                    }

                    // Only content deltas are forwarded; the caller drives tool
                    // lifecycle events itself after executing tools.
                    if matches!(
                        &event,
                        UnifiedStreamEvent::TextDelta { .. }
                            | UnifiedStreamEvent::ThinkingDelta { .. }
                    ) {
                        let _ = tx.send(event).await;
                    }
                }
            }
        }

        for event in adapter.adapt("data: [DONE]").unwrap_or_default() {
            if let UnifiedStreamEvent::ToolComplete {
                tool_id,
                tool_name,
                arguments,
            } = event
            {
                tool_calls.push(ToolCall {
                    id: tool_id,
                    name: tool_name,
                    arguments: serde_json::from_str(&arguments)
                        .unwrap_or(serde_json::Value::Object(Default::default())),
                });
            }
        }

        Ok(LlmResponse {
            content: (!accumulated_content.is_empty()).then_some(accumulated_content),
            thinking: (!accumulated_thinking.is_empty()).then_some(accumulated_thinking),
            tool_calls,
            stop_reason,
            usage,
            model: self.config.model.clone(),
        })
    }

    async fn health_check(&self) -> LlmResult<()> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| missing_api_key_error(&self.config.name))?;

        let response = self
            .client
            .get(self.models_url())
            .header("Authorization", format!("Bearer {}", api_key))
            .send()
            .await
            .map_err(|e| LlmError::NetworkError {
                message: e.to_string(),
            })?;

        let status = response.status().as_u16();
        if status == 200 {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(parse_http_error(status, &body, &self.config.name))
        }
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

/// Non-streaming response format
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
    usage: Option<ResponseUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    #[serde(default)]
    reasoning_tokens: Option<u32>,
}
