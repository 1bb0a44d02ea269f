//! Run State
//!
//! Mutable state owned by one generation run, and the stages it moves through.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use appforge_core::Framework;
use appforge_tools::SharedFiles;

use crate::services::budget::Stage;

/// Upper bound on repair rounds after a failed validation.
pub const AUTO_FIX_MAX_ATTEMPTS: u32 = 2;

/// State of a single run. Never shared across runs.
#[derive(Debug)]
pub struct AgentState {
    pub summary: String,
    /// Written by the file tools, last write wins
    pub files: SharedFiles,
    pub framework: Framework,
    pub auto_fix_attempts: u32,
}

impl AgentState {
    pub fn new(framework: Framework) -> Self {
        Self {
            summary: String::new(),
            files: Arc::new(Mutex::new(BTreeMap::new())),
            framework,
            auto_fix_attempts: 0,
        }
    }

    pub fn files_snapshot(&self) -> BTreeMap<String, String> {
        self.files
            .lock()
            .map(|files| files.clone())
            .unwrap_or_default()
    }

    pub fn has_files(&self) -> bool {
        self.files.lock().map(|f| !f.is_empty()).unwrap_or(false)
    }
}

/// Stages of the run state machine, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Init,
    FrameworkResolution,
    EnvironmentProvision,
    ContextAssembly,
    Generation,
    SummaryExtraction,
    Validation,
    AutoFix,
    Finalize,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::FrameworkResolution => "framework-resolution",
            Self::EnvironmentProvision => "environment-provision",
            Self::ContextAssembly => "context-assembly",
            Self::Generation => "generation",
            Self::SummaryExtraction => "summary-extraction",
            Self::Validation => "validation",
            Self::AutoFix => "auto-fix",
            Self::Finalize => "finalize",
        }
    }

    /// Rough completion percentage when the stage starts.
    pub fn progress(&self) -> u8 {
        match self {
            Self::Init => 0,
            Self::FrameworkResolution => 5,
            Self::EnvironmentProvision => 10,
            Self::ContextAssembly => 20,
            Self::Generation => 30,
            Self::SummaryExtraction => 70,
            Self::Validation => 75,
            Self::AutoFix => 85,
            Self::Finalize => 95,
        }
    }

    /// Budget line this stage draws from.
    pub fn budget_stage(&self) -> Stage {
        match self {
            Self::Init | Self::FrameworkResolution | Self::EnvironmentProvision => {
                Stage::Initialization
            }
            Self::ContextAssembly => Stage::Research,
            Self::Generation => Stage::CodeGeneration,
            Self::Validation | Self::AutoFix => Stage::Validation,
            // A short follow-up call; it must leave room to finalize.
            Self::SummaryExtraction | Self::Finalize => Stage::Finalization,
        }
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
