//! Tool Result Type
//!
//! What a tool hands back to the agentic loop. The loop turns it into a
//! tool-result message for the model and a `tool-output` event for the caller.

use serde::{Deserialize, Serialize};

/// Longest tool output forwarded to the model, in bytes.
pub const MAX_OUTPUT_BYTES: usize = 16 * 1024;

/// Result of a tool execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the execution was successful
    pub success: bool,
    /// Output from the tool (if successful)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Error message (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    /// Create a successful result
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
        }
    }

    /// Create an error result
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }

    /// Convert to string for LLM consumption
    pub fn to_content(&self) -> String {
        let content = if self.success {
            self.output.clone().unwrap_or_default()
        } else {
            format!(
                "Error: {}",
                self.error.as_deref().unwrap_or("Unknown error")
            )
        };
        truncate_tail(&content, MAX_OUTPUT_BYTES)
    }
}

/// Keep the last `max` bytes of `text`; build errors print their summary last.
pub fn truncate_tail(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("[... {} bytes truncated]\n{}", start, &text[start..])
}
