//! Validation Pipeline Integration Tests
//!
//! Runs the per-framework pipelines against in-memory environments, plus a
//! custom pipeline to check phase modes and short-circuiting.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use appforge::core::Framework;
use appforge::quality_gates::{
    validation_pipeline, GateContext, GateMode, GatePhase, GatePipeline, GateResult,
    PipelineConfig, ValidationGate,
};
use appforge::sandbox::{CommandHandler, CommandOutput, MemoryEnvironment};

// ============================================================================
// Helpers
// ============================================================================

fn files(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(p, c)| (p.to_string(), c.to_string()))
        .collect()
}

fn env_with(
    clean_exit: i32,
    build_exit: i32,
    build_output: &'static str,
) -> Arc<MemoryEnvironment> {
    let handler: CommandHandler = Arc::new(move |command, _| {
        if command.starts_with("rm -rf") {
            CommandOutput {
                stdout: String::new(),
                stderr: if clean_exit == 0 {
                    String::new()
                } else {
                    "permission denied".to_string()
                },
                exit_code: clean_exit,
            }
        } else if command == "npm run build" {
            CommandOutput {
                stdout: build_output.to_string(),
                stderr: String::new(),
                exit_code: build_exit,
            }
        } else {
            CommandOutput::default()
        }
    });
    Arc::new(MemoryEnvironment::new("gates").with_command_handler(handler))
}

fn empty_context(framework: Framework) -> GateContext {
    GateContext::new(Arc::new(MemoryEnvironment::new("c")), framework, BTreeMap::new())
}

struct FixedGate {
    id: &'static str,
    phase: GatePhase,
    pass: bool,
}

#[async_trait]
impl ValidationGate for FixedGate {
    fn id(&self) -> &str {
        self.id
    }

    fn name(&self) -> &str {
        self.id
    }

    fn phase(&self) -> GatePhase {
        self.phase
    }

    async fn run(&self, _ctx: &GateContext) -> GateResult {
        if self.pass {
            GateResult::passed(self.id, self.id, self.phase, 1)
        } else {
            let message = format!("{} failed", self.id);
            GateResult::failed(self.id, self.id, self.phase, 1, message, Vec::new())
        }
    }
}

fn gate(id: &'static str, phase: GatePhase, pass: bool) -> Arc<dyn ValidationGate> {
    Arc::new(FixedGate { id, phase, pass })
}

// ============================================================================
// Framework pipelines
// ============================================================================

#[tokio::test]
async fn test_nextjs_pipeline_passes_clean_project() {
    let env = env_with(0, 0, "Compiled successfully");
    let ctx = GateContext::new(
        env.clone(),
        Framework::Nextjs,
        files(&[
            ("app/page.tsx", "import { Button } from \"@/components/ui/button\";\n"),
            ("app/layout.tsx", "export default function Layout() { return null; }\n"),
        ]),
    );

    let result = validation_pipeline(Framework::Nextjs).execute(&ctx).await;

    assert!(result.passed);
    assert!(result.error_text().is_none());
    assert_eq!(env.command_log().len(), 2);
    assert_eq!(env.command_log()[1], "npm run build");
}

#[tokio::test]
async fn test_nextjs_policy_fails_even_when_build_passes() {
    let env = env_with(0, 0, "Compiled successfully");
    let ctx = GateContext::new(
        env,
        Framework::Nextjs,
        files(&[("app/page.tsx", "import { Card } from \"@/components/card\";\n")]),
    );

    let result = validation_pipeline(Framework::Nextjs).execute(&ctx).await;

    assert!(!result.passed);
    let text = result.error_text().unwrap();
    assert!(!text.contains("[Build]"));
    assert!(text.contains("@/components/card"));
}

#[tokio::test]
async fn test_policy_only_applies_to_nextjs() {
    let env = env_with(0, 0, "built");
    let ctx = GateContext::new(
        env,
        Framework::React,
        files(&[("src/App.tsx", "import { Card } from \"./components/card\";\n")]),
    );

    let result = validation_pipeline(Framework::React).execute(&ctx).await;
    assert!(result.passed);
}

#[tokio::test]
async fn test_failed_clean_is_only_a_warning() {
    let env = env_with(1, 0, "built");
    let ctx = GateContext::new(env, Framework::Vue, BTreeMap::new());

    let result = validation_pipeline(Framework::Vue).execute(&ctx).await;

    assert!(result.passed);
    assert!(!result.phase_results[0].passed);
    assert_eq!(result.phase_results[0].mode, GateMode::Soft);
    assert!(result.error_text().is_none());
}

#[tokio::test]
async fn test_build_output_reaches_error_text() {
    let env = env_with(0, 1, "Type error: Property 'x' does not exist on type '{}'.");
    let ctx = GateContext::new(env, Framework::Svelte, files(&[("src/App.svelte", "<p/>")]));

    let result = validation_pipeline(Framework::Svelte).execute(&ctx).await;

    assert!(!result.passed);
    assert_eq!(
        result.error_text().as_deref(),
        Some("[Build] Type error: Property 'x' does not exist on type '{}'.")
    );
}

// ============================================================================
// Custom pipelines
// ============================================================================

#[tokio::test]
async fn test_short_circuit_stops_after_hard_failure() {
    let config = PipelineConfig {
        short_circuit: true,
        ..PipelineConfig::default()
    };
    let pipeline = GatePipeline::new(config)
        .with_gate(gate("prep", GatePhase::PreValidation, true))
        .with_gate(gate("build", GatePhase::Validation, false))
        .with_gate(gate("policy", GatePhase::PostValidation, false));
    let ctx = empty_context(Framework::Nextjs);

    let result = pipeline.execute(&ctx).await;

    assert!(!result.passed);
    assert!(result.short_circuited);
    assert_eq!(result.short_circuit_phase, Some(GatePhase::Validation));
    assert_eq!(result.phase_results.len(), 2);
    assert_eq!(result.error_text().as_deref(), Some("[build] build failed"));
}

#[tokio::test]
async fn test_without_short_circuit_all_failures_are_collected() {
    let pipeline = GatePipeline::new(PipelineConfig::default())
        .with_gate(gate("build", GatePhase::Validation, false))
        .with_gate(gate("policy", GatePhase::PostValidation, false));
    let ctx = empty_context(Framework::Nextjs);

    let result = pipeline.execute(&ctx).await;

    assert!(!result.short_circuited);
    assert_eq!(result.phase_results.len(), 3);
    let text = result.error_text().unwrap();
    assert!(text.contains("build failed"));
    assert!(text.contains("policy failed"));
}

#[tokio::test]
async fn test_soft_validation_phase_does_not_fail() {
    let mut config = PipelineConfig::default();
    config.set_phase_mode(GatePhase::Validation, GateMode::Soft);
    let pipeline = GatePipeline::new(config).with_gate(gate("build", GatePhase::Validation, false));
    let ctx = empty_context(Framework::Angular);

    let result = pipeline.execute(&ctx).await;
    assert!(result.passed);
    assert!(result.error_text().is_none());
}
