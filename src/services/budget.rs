//! Budget Controller
//!
//! Tracks one run against the global wall-clock deadline. Each stage gets a
//! slice of the deadline from one of three fixed profiles; the profile is
//! swapped wholesale when the prompt's complexity is known. The controller
//! only reports, it never aborts anything itself.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::models::StageRecord;

/// Hard deadline for a whole run.
pub const GLOBAL_DEADLINE_MS: u64 = 300_000;
/// Elapsed time at which a warning is raised.
pub const WARNING_THRESHOLD_MS: u64 = 270_000;
/// Elapsed time at which the emergency level is raised.
pub const EMERGENCY_THRESHOLD_MS: u64 = 285_000;
/// Elapsed time at which the critical level is raised.
pub const CRITICAL_THRESHOLD_MS: u64 = 295_000;

/// Prompt length above which a request is complex regardless of keywords.
const COMPLEX_LENGTH: usize = 1000;
/// Prompt length above which a request is at least medium.
const MEDIUM_LENGTH: usize = 300;

const COMPLEX_KEYWORDS: &[&str] = &[
    "enterprise",
    "distributed",
    "microservice",
    "authentication",
    "authorization",
    "database schema",
    "real-time",
    "multi-tenant",
    "payment",
    "scalable",
];

/// Stages a run goes through, each with its own slice of the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Initialization,
    Research,
    CodeGeneration,
    Validation,
    Finalization,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Initialization => "initialization",
            Stage::Research => "research",
            Stage::CodeGeneration => "codeGeneration",
            Stage::Validation => "validation",
            Stage::Finalization => "finalization",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse size of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl Complexity {
    /// Classify a prompt. Pure function of the text.
    pub fn classify(prompt: &str) -> Self {
        let lower = prompt.to_lowercase();
        let length = prompt.chars().count();
        if length > COMPLEX_LENGTH || COMPLEX_KEYWORDS.iter().any(|k| lower.contains(k)) {
            Complexity::Complex
        } else if length > MEDIUM_LENGTH {
            Complexity::Medium
        } else {
            Complexity::Simple
        }
    }
}

/// Per-stage allowance in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeBudget {
    pub initialization: u64,
    pub research: u64,
    pub code_generation: u64,
    pub validation: u64,
    pub finalization: u64,
}

impl TimeBudget {
    /// The fixed profile for a complexity class.
    pub fn for_complexity(complexity: Complexity) -> Self {
        match complexity {
            Complexity::Simple => Self {
                initialization: 10_000,
                research: 15_000,
                code_generation: 150_000,
                validation: 30_000,
                finalization: 15_000,
            },
            Complexity::Medium => Self {
                initialization: 15_000,
                research: 30_000,
                code_generation: 180_000,
                validation: 40_000,
                finalization: 15_000,
            },
            Complexity::Complex => Self {
                initialization: 15_000,
                research: 45_000,
                code_generation: 170_000,
                validation: 45_000,
                finalization: 20_000,
            },
        }
    }

    pub fn get(&self, stage: Stage) -> u64 {
        match stage {
            Stage::Initialization => self.initialization,
            Stage::Research => self.research,
            Stage::CodeGeneration => self.code_generation,
            Stage::Validation => self.validation,
            Stage::Finalization => self.finalization,
        }
    }

    pub fn total(&self) -> u64 {
        self.initialization
            + self.research
            + self.code_generation
            + self.validation
            + self.finalization
    }
}

impl Default for TimeBudget {
    fn default() -> Self {
        Self::for_complexity(Complexity::Medium)
    }
}

/// Snapshot returned by [`BudgetController::check_timeout`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutStatus {
    pub is_warning: bool,
    pub is_emergency: bool,
    pub is_critical: bool,
    pub remaining_ms: u64,
    /// Only present the first time a level is reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TimeoutStatus {
    /// Classification for an absolute elapsed time. Levels are cumulative.
    pub fn at(elapsed_ms: u64) -> Self {
        let is_critical = elapsed_ms >= CRITICAL_THRESHOLD_MS;
        let is_emergency = elapsed_ms >= EMERGENCY_THRESHOLD_MS;
        let is_warning = elapsed_ms >= WARNING_THRESHOLD_MS;
        Self {
            is_warning,
            is_emergency,
            is_critical,
            remaining_ms: GLOBAL_DEADLINE_MS.saturating_sub(elapsed_ms),
            message: None,
        }
    }

    /// Fixed text for the highest raised level.
    fn level_message(&self) -> Option<&'static str> {
        if self.is_critical {
            Some("Critical: less than 5 seconds left, finishing with what we have")
        } else if self.is_emergency {
            Some("Less than 15 seconds left, skipping optional work")
        } else if self.is_warning {
            Some("Approaching the time limit, less than 30 seconds left")
        } else {
            None
        }
    }
}

/// Run-scoped deadline bookkeeping.
#[derive(Debug)]
pub struct BudgetController {
    started: Instant,
    budget: TimeBudget,
    complexity: Complexity,
    stages: Vec<StageRecord>,
    open: HashMap<String, (usize, Instant)>,
    reported: HashSet<&'static str>,
}

impl BudgetController {
    /// Start the clock with the medium profile.
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            budget: TimeBudget::default(),
            complexity: Complexity::Medium,
            stages: Vec::new(),
            open: HashMap::new(),
            reported: HashSet::new(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }

    /// `max(0, deadline − elapsed)`
    pub fn remaining_ms(&self) -> u64 {
        GLOBAL_DEADLINE_MS.saturating_sub(self.elapsed_ms())
    }

    pub fn budget(&self) -> &TimeBudget {
        &self.budget
    }

    pub fn complexity(&self) -> Complexity {
        self.complexity
    }

    /// Replace the whole table with the profile for `complexity`.
    pub fn adapt_budget(&mut self, complexity: Complexity) {
        if complexity != self.complexity {
            tracing::debug!(from = ?self.complexity, to = ?complexity, "adapting time budget");
        }
        self.complexity = complexity;
        self.budget = TimeBudget::for_complexity(complexity);
    }

    pub fn start_stage(&mut self, name: &str) {
        let index = self.stages.len();
        self.stages.push(StageRecord::start(name));
        self.open.insert(name.to_string(), (index, Instant::now()));
    }

    /// Close a stage and return its duration. Unknown or already closed stages yield 0.
    pub fn end_stage(&mut self, name: &str) -> u64 {
        let Some((index, started)) = self.open.remove(name) else {
            return 0;
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        if let Some(record) = self.stages.get_mut(index) {
            record.ended_at = Some(Utc::now());
            record.duration_ms = Some(duration_ms);
        }
        tracing::debug!(stage = name, duration_ms, "stage finished");
        duration_ms
    }

    pub fn stages(&self) -> &[StageRecord] {
        &self.stages
    }

    /// Classify the current elapsed time. A level's message is returned only
    /// the first time that level is seen.
    pub fn check_timeout(&mut self) -> TimeoutStatus {
        let mut status = TimeoutStatus::at(self.elapsed_ms());
        if let Some(message) = status.level_message() {
            if self.reported.insert(message) {
                tracing::warn!(remaining_ms = status.remaining_ms, "{}", message);
                status.message = Some(message.to_string());
            }
        }
        status
    }

    /// Whether the time left cannot cover the stage's configured budget.
    pub fn should_skip_stage(&self, stage: Stage) -> bool {
        self.remaining_ms() < self.budget.get(stage)
    }
}

impl Default for BudgetController {
    fn default() -> Self {
        Self::new()
    }
}
