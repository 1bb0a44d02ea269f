//! AppForge - Generation Engine
//!
//! Turns a natural-language request into a working project by driving a
//! model through a tool-augmented loop inside an execution environment,
//! then validating and auto-repairing the result. It includes:
//! - The generation state machine and its event stream
//! - Time budget, research dispatch and framework resolution services
//! - Storage layer (TOML config, project store interface)
//! - Data models and utilities
//!
//! Model providers, execution environments, tools and validation gates live
//! in the `appforge-*` member crates and are re-exported here.

pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

pub use appforge_core as core;
pub use appforge_llm as llm;
pub use appforge_quality_gates as quality_gates;
pub use appforge_sandbox as sandbox;
pub use appforge_tools as tools;

pub use models::{GenerationOutcome, GenerationRequest, HistoryMessage, Project};
pub use services::{EngineDeps, EventBus, EventStream, GenerationEngine};
pub use storage::{EngineConfig, InMemoryProjectStore, ProjectStore};
pub use utils::{EngineError, EngineResult};
