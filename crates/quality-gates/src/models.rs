//! Quality Gates Models
//!
//! Gate status, phase and mode types, and the per-gate result record.

use serde::{Deserialize, Serialize};

/// Quality gate status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateStatus {
    /// Gate passed successfully
    Passed,
    /// Gate failed with errors
    Failed,
    /// Gate was skipped (e.g. the environment cannot run commands)
    Skipped,
}

impl GateStatus {
    /// Check if this status indicates success
    pub fn is_success(&self) -> bool {
        matches!(self, GateStatus::Passed | GateStatus::Skipped)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, GateStatus::Failed)
    }
}

impl std::fmt::Display for GateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateStatus::Passed => write!(f, "passed"),
            GateStatus::Failed => write!(f, "failed"),
            GateStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Quality gate execution phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatePhase {
    /// Phase 1: workspace preparation (artifact cleanup)
    PreValidation,
    /// Phase 2: the build
    Validation,
    /// Phase 3: framework structural policy
    PostValidation,
}

impl GatePhase {
    pub const ALL: [GatePhase; 3] = [
        GatePhase::PreValidation,
        GatePhase::Validation,
        GatePhase::PostValidation,
    ];
}

impl std::fmt::Display for GatePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatePhase::PreValidation => write!(f, "pre_validation"),
            GatePhase::Validation => write!(f, "validation"),
            GatePhase::PostValidation => write!(f, "post_validation"),
        }
    }
}

/// Gate mode determining how failures are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    /// Warning only - failures are reported but don't fail validation
    Soft,
    /// Blocking - failures fail validation
    #[default]
    Hard,
}

/// Result from a single gate execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateResult {
    pub gate_id: String,
    pub gate_name: String,
    pub phase: GatePhase,
    pub status: GateStatus,
    pub duration_ms: u64,
    /// Output message; for a failed build, the raw build output
    pub message: String,
    /// Individual findings, e.g. policy violations
    pub findings: Vec<String>,
}

impl GateResult {
    pub fn passed(gate_id: &str, gate_name: &str, phase: GatePhase, duration_ms: u64) -> Self {
        Self {
            gate_id: gate_id.to_string(),
            gate_name: gate_name.to_string(),
            phase,
            status: GateStatus::Passed,
            duration_ms,
            message: "Gate passed".to_string(),
            findings: Vec::new(),
        }
    }

    pub fn failed(
        gate_id: &str,
        gate_name: &str,
        phase: GatePhase,
        duration_ms: u64,
        message: String,
        findings: Vec<String>,
    ) -> Self {
        Self {
            gate_id: gate_id.to_string(),
            gate_name: gate_name.to_string(),
            phase,
            status: GateStatus::Failed,
            duration_ms,
            message,
            findings,
        }
    }

    pub fn skipped(gate_id: &str, gate_name: &str, phase: GatePhase, reason: &str) -> Self {
        Self {
            gate_id: gate_id.to_string(),
            gate_name: gate_name.to_string(),
            phase,
            status: GateStatus::Skipped,
            duration_ms: 0,
            message: reason.to_string(),
            findings: Vec::new(),
        }
    }

    pub fn passed_or_skipped(&self) -> bool {
        self.status.is_success()
    }

    /// The failure rendered for the model: message followed by findings.
    pub fn failure_text(&self) -> Option<String> {
        if !self.status.is_failure() {
            return None;
        }
        let mut text = format!("[{}] {}", self.gate_name, self.message.trim_end());
        for finding in &self.findings {
            text.push_str("\n- ");
            text.push_str(finding);
        }
        Some(text)
    }
}
