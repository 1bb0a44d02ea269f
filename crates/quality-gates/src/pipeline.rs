//! Three-Phase Validation Pipeline
//!
//! A `GatePipeline` runs registered gates against a generated project in
//! three sequential phases:
//! 1. PRE_VALIDATION - workspace preparation (sequential)
//! 2. VALIDATION - the build (gates in parallel)
//! 3. POST_VALIDATION - framework structural policy (gates in parallel)
//!
//! Each phase has a mode (Soft = warning only, Hard = failing). With
//! `short_circuit` set, a hard failure stops the remaining phases; otherwise
//! every phase runs so all problems are reported together.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use appforge_core::Framework;
use appforge_sandbox::ExecutionEnvironment;

use crate::models::{GateMode, GatePhase, GateResult};

/// Default timeout for the build command.
pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(180);

/// What a gate gets to look at.
#[derive(Clone)]
pub struct GateContext {
    pub env: Arc<dyn ExecutionEnvironment>,
    pub framework: Framework,
    /// Files produced by the run, path to content
    pub files: BTreeMap<String, String>,
    pub build_timeout: Duration,
}

impl GateContext {
    pub fn new(
        env: Arc<dyn ExecutionEnvironment>,
        framework: Framework,
        files: BTreeMap<String, String>,
    ) -> Self {
        Self {
            env,
            framework,
            files,
            build_timeout: DEFAULT_BUILD_TIMEOUT,
        }
    }
}

/// A single validation gate.
#[async_trait]
pub trait ValidationGate: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn phase(&self) -> GatePhase;

    async fn run(&self, ctx: &GateContext) -> GateResult;
}

/// Result of executing all gates in a single phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseResult {
    pub phase: GatePhase,
    pub mode: GateMode,
    pub passed: bool,
    pub gate_results: Vec<GateResult>,
    pub duration_ms: u64,
}

impl PhaseResult {
    pub fn new(phase: GatePhase, mode: GateMode, gate_results: Vec<GateResult>) -> Self {
        let duration_ms = gate_results.iter().map(|r| r.duration_ms).sum();
        let passed = gate_results.iter().all(|r| r.passed_or_skipped());
        Self {
            phase,
            mode,
            passed,
            gate_results,
            duration_ms,
        }
    }

    /// Whether this phase has a hard failure (failed + hard mode).
    pub fn is_hard_fail(&self) -> bool {
        !self.passed && self.mode == GateMode::Hard
    }
}

/// Per-phase modes and the short-circuit switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    pub modes: HashMap<GatePhase, GateMode>,
    pub short_circuit: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut modes = HashMap::new();
        modes.insert(GatePhase::PreValidation, GateMode::Soft);
        modes.insert(GatePhase::Validation, GateMode::Hard);
        modes.insert(GatePhase::PostValidation, GateMode::Hard);
        Self {
            modes,
            short_circuit: false,
        }
    }
}

impl PipelineConfig {
    pub fn mode(&self, phase: GatePhase) -> GateMode {
        self.modes.get(&phase).copied().unwrap_or_default()
    }

    pub fn set_phase_mode(&mut self, phase: GatePhase, mode: GateMode) {
        self.modes.insert(phase, mode);
    }
}

/// Overall pipeline execution result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    /// No hard phase failed
    pub passed: bool,
    pub phase_results: Vec<PhaseResult>,
    pub total_duration_ms: u64,
    pub short_circuited: bool,
    pub short_circuit_phase: Option<GatePhase>,
    pub finished_at: DateTime<Utc>,
}

impl PipelineResult {
    pub fn new(
        phase_results: Vec<PhaseResult>,
        short_circuited: bool,
        short_circuit_phase: Option<GatePhase>,
    ) -> Self {
        let total_duration_ms = phase_results.iter().map(|r| r.duration_ms).sum();
        let passed = phase_results
            .iter()
            .all(|r| r.passed || r.mode == GateMode::Soft);
        Self {
            passed,
            phase_results,
            total_duration_ms,
            short_circuited,
            short_circuit_phase,
            finished_at: Utc::now(),
        }
    }

    /// Failures of hard phases joined into one block of text for the model,
    /// or `None` when validation passed.
    pub fn error_text(&self) -> Option<String> {
        let failures: Vec<String> = self
            .phase_results
            .iter()
            .filter(|p| p.mode == GateMode::Hard)
            .flat_map(|p| p.gate_results.iter())
            .filter_map(|g| g.failure_text())
            .collect();
        if failures.is_empty() {
            None
        } else {
            Some(failures.join("\n\n"))
        }
    }

    /// Every gate result in execution order.
    pub fn gate_results(&self) -> impl Iterator<Item = &GateResult> {
        self.phase_results.iter().flat_map(|p| p.gate_results.iter())
    }
}

/// Runs registered gates phase by phase.
pub struct GatePipeline {
    config: PipelineConfig,
    gates: Vec<Arc<dyn ValidationGate>>,
}

impl GatePipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            gates: Vec::new(),
        }
    }

    pub fn register_gate(&mut self, gate: Arc<dyn ValidationGate>) {
        self.gates.push(gate);
    }

    pub fn with_gate(mut self, gate: Arc<dyn ValidationGate>) -> Self {
        self.register_gate(gate);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute the full three-phase pipeline.
    pub async fn execute(&self, ctx: &GateContext) -> PipelineResult {
        let mut phase_results = Vec::new();
        let mut short_circuit_phase = None;

        for phase in GatePhase::ALL {
            let result = self.execute_phase(phase, ctx).await;
            let is_hard_fail = result.is_hard_fail();
            if !result.passed {
                tracing::debug!(%phase, hard = is_hard_fail, "validation phase failed");
            }
            phase_results.push(result);

            if is_hard_fail && self.config.short_circuit {
                short_circuit_phase = Some(phase);
                break;
            }
        }

        PipelineResult::new(
            phase_results,
            short_circuit_phase.is_some(),
            short_circuit_phase,
        )
    }

    async fn execute_phase(&self, phase: GatePhase, ctx: &GateContext) -> PhaseResult {
        let mode = self.config.mode(phase);
        let gates: Vec<&Arc<dyn ValidationGate>> =
            self.gates.iter().filter(|g| g.phase() == phase).collect();

        let gate_results = match phase {
            GatePhase::PreValidation => {
                let mut results = Vec::with_capacity(gates.len());
                for gate in gates {
                    results.push(gate.run(ctx).await);
                }
                results
            }
            GatePhase::Validation | GatePhase::PostValidation => {
                futures_util::future::join_all(gates.into_iter().map(|g| g.run(ctx))).await
            }
        };

        PhaseResult::new(phase, mode, gate_results)
    }
}
