//! Validation Step
//!
//! Runs the framework's validation pipeline over the run's files and folds
//! error signatures found in the model's own output into the verdict.

use std::collections::BTreeMap;
use std::sync::Arc;

use appforge_core::Framework;
use appforge_quality_gates::{has_error_signature, validation_pipeline, GateContext};
use appforge_sandbox::ExecutionEnvironment;

/// Outcome of one validation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub passed: bool,
    /// Build output and policy violations, present when the pipeline failed
    pub errors: Option<String>,
    /// The model's output reported an error it did not resolve
    pub output_has_errors: bool,
}

impl ValidationReport {
    pub fn clean() -> Self {
        Self {
            passed: true,
            errors: None,
            output_has_errors: false,
        }
    }

    /// Whether another auto-fix round is warranted.
    pub fn needs_fix(&self) -> bool {
        !self.passed || self.output_has_errors
    }

    /// Text handed to the fix prompt.
    pub fn fix_input(&self, model_output: &str) -> String {
        match &self.errors {
            Some(errors) => errors.clone(),
            None => model_output.to_string(),
        }
    }
}

/// Validate `files` in `env`. No files means nothing to check.
pub async fn validate(
    env: Arc<dyn ExecutionEnvironment>,
    framework: Framework,
    files: BTreeMap<String, String>,
    model_output: &str,
) -> ValidationReport {
    let output_has_errors = has_error_signature(model_output);
    if files.is_empty() {
        return ValidationReport {
            output_has_errors,
            ..ValidationReport::clean()
        };
    }

    let result = validation_pipeline(framework)
        .execute(&GateContext::new(env, framework, files))
        .await;
    let errors = result.error_text();
    tracing::info!(
        passed = result.passed,
        duration_ms = result.total_duration_ms,
        output_has_errors,
        "validation finished"
    );
    ValidationReport {
        passed: result.passed,
        errors,
        output_has_errors,
    }
}
