//! Run Events
//!
//! The typed progress events a generation run delivers to its caller. Every
//! event carries the wall-clock timestamp at which it was emitted; consumers
//! may rely on emission order only.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::framework::Framework;

/// A single event in a run's ordered event sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamEvent {
    /// Emission time
    pub timestamp: DateTime<Utc>,
    /// Kind-specific payload
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// Payload of a `StreamEvent`, tagged by kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EventPayload {
    /// Human-readable status line (stage transitions, retries, recoveries)
    Status { message: String },

    /// Streamed model text
    TextDelta { content: String },

    /// The model invoked a tool
    ToolCall {
        tool_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// A tool finished
    ToolOutput {
        tool_id: String,
        output: String,
        is_error: bool,
    },

    /// A file was written to the environment
    FileCreated { path: String, bytes: usize },

    /// Coarse stage progress
    Progress { stage: String, percent: u8 },

    /// Research subagents were dispatched
    ResearchStart {
        task_count: usize,
        task_types: Vec<String>,
    },

    /// Research subagents finished
    ResearchComplete {
        completed: usize,
        failed: usize,
        elapsed_ms: u64,
    },

    /// Remaining time budget at a stage boundary
    TimeBudget {
        stage: String,
        remaining_ms: u64,
        is_warning: bool,
        is_emergency: bool,
        is_critical: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// The run failed fatally
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// The run finished
    Complete {
        summary: String,
        files: BTreeMap<String, String>,
        framework: Framework,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sandbox_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        warning: Option<String>,
    },
}

impl EventPayload {
    /// Kebab-case kind name, identical to the serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::Status { .. } => "status",
            EventPayload::TextDelta { .. } => "text-delta",
            EventPayload::ToolCall { .. } => "tool-call",
            EventPayload::ToolOutput { .. } => "tool-output",
            EventPayload::FileCreated { .. } => "file-created",
            EventPayload::Progress { .. } => "progress",
            EventPayload::ResearchStart { .. } => "research-start",
            EventPayload::ResearchComplete { .. } => "research-complete",
            EventPayload::TimeBudget { .. } => "time-budget",
            EventPayload::Error { .. } => "error",
            EventPayload::Complete { .. } => "complete",
        }
    }

    /// Whether this payload ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventPayload::Error { .. } | EventPayload::Complete { .. })
    }

    /// Whether this payload is a tool side event (queued until the next text flush).
    pub fn is_side_event(&self) -> bool {
        matches!(
            self,
            EventPayload::ToolCall { .. }
                | EventPayload::ToolOutput { .. }
                | EventPayload::FileCreated { .. }
        )
    }
}

impl StreamEvent {
    /// Stamp a payload with the current time.
    pub fn now(payload: EventPayload) -> Self {
        Self {
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn status(message: impl Into<String>) -> Self {
        Self::now(EventPayload::Status {
            message: message.into(),
        })
    }

    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }
}
