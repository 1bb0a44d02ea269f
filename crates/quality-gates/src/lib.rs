//! AppForge Quality Gates
//!
//! Validation of generated projects:
//!
//! - `models` - Gate status, phase, mode and result types
//! - `pipeline` - Three-phase pipeline orchestrator (`GatePipeline`, `ValidationGate`)
//! - `validators` - Artifact cleanup, build and framework policy gates
//! - `signatures` - Error signatures recognized in model output

pub mod models;
pub mod pipeline;
pub mod signatures;
pub mod validators;

// Re-export core model types
pub use models::{GateMode, GatePhase, GateResult, GateStatus};

// Re-export pipeline types
pub use pipeline::{
    GateContext, GatePipeline, PhaseResult, PipelineConfig, PipelineResult, ValidationGate,
    DEFAULT_BUILD_TIMEOUT,
};

pub use signatures::{has_error_signature, matched_signatures};

// Re-export validators
pub use validators::{
    validation_pipeline, BuildGate, CleanArtifactsGate, NextjsUiPolicyGate, NEXTJS_UI_PREFIX,
};
