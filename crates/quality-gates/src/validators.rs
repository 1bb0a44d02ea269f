//! Validation Gates
//!
//! The gates run against every generated project: artifact cleanup, the
//! framework build, and the framework's structural policy.

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use async_trait::async_trait;
use regex::Regex;

use appforge_core::Framework;
use appforge_sandbox::{CommandOptions, SandboxError};

use crate::models::{GatePhase, GateResult};
use crate::pipeline::{GateContext, GatePipeline, PipelineConfig, ValidationGate};

/// Directory Next.js UI primitives must be imported from.
pub const NEXTJS_UI_PREFIX: &str = "@/components/ui/";

/// Component names treated as UI primitives.
const UI_PRIMITIVES: &[&str] = &[
    "accordion",
    "alert",
    "avatar",
    "badge",
    "button",
    "card",
    "checkbox",
    "dialog",
    "dropdown-menu",
    "input",
    "label",
    "popover",
    "select",
    "separator",
    "sheet",
    "skeleton",
    "switch",
    "table",
    "tabs",
    "textarea",
    "toast",
    "tooltip",
];

/// The pipeline every generated project goes through.
pub fn validation_pipeline(framework: Framework) -> GatePipeline {
    let mut pipeline = GatePipeline::new(PipelineConfig::default())
        .with_gate(Arc::new(CleanArtifactsGate))
        .with_gate(Arc::new(BuildGate));
    if framework == Framework::Nextjs {
        pipeline.register_gate(Arc::new(NextjsUiPolicyGate));
    }
    pipeline
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Removes stale build output before building.
pub struct CleanArtifactsGate;

#[async_trait]
impl ValidationGate for CleanArtifactsGate {
    fn id(&self) -> &str {
        "clean"
    }

    fn name(&self) -> &str {
        "Clean Artifacts"
    }

    fn phase(&self) -> GatePhase {
        GatePhase::PreValidation
    }

    async fn run(&self, ctx: &GateContext) -> GateResult {
        if !ctx.env.capabilities().can_run_commands() {
            return GateResult::skipped(
                self.id(),
                self.name(),
                self.phase(),
                "environment cannot run commands",
            );
        }
        let started = Instant::now();
        let command = format!("rm -rf {}", ctx.framework.artifact_dirs().join(" "));
        match ctx.env.run_command(&command, CommandOptions::default()).await {
            Ok(out) if out.success() => {
                GateResult::passed(self.id(), self.name(), self.phase(), elapsed_ms(started))
            }
            Ok(out) => GateResult::failed(
                self.id(),
                self.name(),
                self.phase(),
                elapsed_ms(started),
                out.combined(),
                Vec::new(),
            ),
            Err(e) => GateResult::failed(
                self.id(),
                self.name(),
                self.phase(),
                elapsed_ms(started),
                e.to_string(),
                Vec::new(),
            ),
        }
    }
}

/// Runs the framework's build command.
pub struct BuildGate;

#[async_trait]
impl ValidationGate for BuildGate {
    fn id(&self) -> &str {
        "build"
    }

    fn name(&self) -> &str {
        "Build"
    }

    fn phase(&self) -> GatePhase {
        GatePhase::Validation
    }

    async fn run(&self, ctx: &GateContext) -> GateResult {
        if !ctx.env.capabilities().can_run_commands() {
            return GateResult::skipped(
                self.id(),
                self.name(),
                self.phase(),
                "environment cannot run commands",
            );
        }
        let started = Instant::now();
        let command = ctx.framework.build_command();
        let options = CommandOptions::with_timeout(ctx.build_timeout);

        match ctx.env.run_command(command, options).await {
            Ok(out) if out.success() => {
                tracing::debug!(env = ctx.env.id(), "build passed");
                GateResult::passed(self.id(), self.name(), self.phase(), elapsed_ms(started))
            }
            Ok(out) => {
                tracing::info!(env = ctx.env.id(), exit_code = out.exit_code, "build failed");
                GateResult::failed(
                    self.id(),
                    self.name(),
                    self.phase(),
                    elapsed_ms(started),
                    out.combined(),
                    Vec::new(),
                )
            }
            Err(SandboxError::Timeout(ms)) => GateResult::failed(
                self.id(),
                self.name(),
                self.phase(),
                elapsed_ms(started),
                format!("`{}` timed out after {} ms", command, ms),
                Vec::new(),
            ),
            Err(e) if e.is_unsupported() => {
                GateResult::skipped(self.id(), self.name(), self.phase(), &e.to_string())
            }
            Err(e) => GateResult::failed(
                self.id(),
                self.name(),
                self.phase(),
                elapsed_ms(started),
                e.to_string(),
                Vec::new(),
            ),
        }
    }
}

fn import_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?m)^\s*import\s[^;]*?\sfrom\s+["']([^"']+)["']"#).ok())
        .as_ref()
}

/// Next.js projects must import UI primitives from `@/components/ui/`.
pub struct NextjsUiPolicyGate;

impl NextjsUiPolicyGate {
    /// Violations in one source file, as human-readable findings.
    pub fn check_file(path: &str, content: &str) -> Vec<String> {
        if path.starts_with("components/ui/") || !is_source_file(path) {
            return Vec::new();
        }
        let Some(pattern) = import_pattern() else {
            return Vec::new();
        };
        pattern
            .captures_iter(content)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str())
            .filter(|specifier| is_misplaced_primitive(specifier))
            .map(|specifier| {
                format!(
                    "{} imports '{}'; UI primitives must come from {}",
                    path, specifier, NEXTJS_UI_PREFIX
                )
            })
            .collect()
    }
}

fn is_source_file(path: &str) -> bool {
    [".tsx", ".ts", ".jsx", ".js"]
        .iter()
        .any(|ext| path.ends_with(ext))
}

fn is_misplaced_primitive(specifier: &str) -> bool {
    if specifier.starts_with(NEXTJS_UI_PREFIX) {
        return false;
    }
    let local = specifier.starts_with("@/") || specifier.starts_with('.');
    if !local {
        return false;
    }
    let last = specifier.rsplit('/').next().unwrap_or(specifier);
    let last = last.trim_end_matches(".tsx").trim_end_matches(".jsx");
    specifier.contains("/ui/") || UI_PRIMITIVES.contains(&last)
}

#[async_trait]
impl ValidationGate for NextjsUiPolicyGate {
    fn id(&self) -> &str {
        "framework_policy"
    }

    fn name(&self) -> &str {
        "Framework Policy"
    }

    fn phase(&self) -> GatePhase {
        GatePhase::PostValidation
    }

    async fn run(&self, ctx: &GateContext) -> GateResult {
        if ctx.framework != Framework::Nextjs {
            return GateResult::skipped(
                self.id(),
                self.name(),
                self.phase(),
                "no policy for framework",
            );
        }
        let findings: Vec<String> = ctx
            .files
            .iter()
            .flat_map(|(path, content)| Self::check_file(path, content))
            .collect();
        if findings.is_empty() {
            GateResult::passed(self.id(), self.name(), self.phase(), 0)
        } else {
            GateResult::failed(
                self.id(),
                self.name(),
                self.phase(),
                0,
                format!("{} UI import violation(s)", findings.len()),
                findings,
            )
        }
    }
}
