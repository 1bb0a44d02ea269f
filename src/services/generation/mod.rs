//! Generation
//!
//! The generation state machine and its parts:
//!
//! - `engine` - `GenerationEngine`, the run driver
//! - `agentic` - one tool-augmented model call
//! - `context` - crawl and message assembly
//! - `validation` - build and policy checks feeding auto-fix
//! - `prompts` - system and follow-up prompts, summary marker
//! - `state` - run-scoped state and stage names

pub mod agentic;
pub mod context;
pub mod engine;
pub mod prompts;
pub mod state;
pub mod validation;

pub use agentic::{AgentLoop, LoopOutcome};
pub use engine::{EngineDeps, GenerationEngine};
pub use prompts::extract_task_summary;
pub use state::{AgentState, RunStage, AUTO_FIX_MAX_ATTEMPTS};
pub use validation::ValidationReport;
