//! Generation Tools
//!
//! The three tools the generation loop exposes to the model:
//! `terminal`, `createOrUpdateFiles` and `readFiles`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use appforge_core::EventPayload;
use appforge_llm::ParameterSchema;
use appforge_sandbox::{validate_path, CommandOptions, SandboxError};

use crate::executor::ToolResult;
use crate::trait_def::{parse_args, Tool, ToolContext, ToolRegistry};

pub const TERMINAL: &str = "terminal";
pub const CREATE_OR_UPDATE_FILES: &str = "createOrUpdateFiles";
pub const READ_FILES: &str = "readFiles";

/// Registry holding the three generation tools.
pub fn generation_tools() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(TerminalTool));
    registry.register(Arc::new(CreateOrUpdateFilesTool));
    registry.register(Arc::new(ReadFilesTool));
    registry
}

// ── terminal ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TerminalArgs {
    command: String,
}

/// Runs a shell command in the environment.
pub struct TerminalTool;

#[async_trait]
impl Tool for TerminalTool {
    fn name(&self) -> &str {
        TERMINAL
    }

    fn description(&self) -> &str {
        "Run a shell command in the project directory, e.g. to install packages with npm. \
         Returns the combined stdout and stderr."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        let mut props = HashMap::new();
        props.insert(
            "command".to_string(),
            ParameterSchema::string(Some("The command to run")),
        );
        ParameterSchema::object(None, props, vec!["command".to_string()])
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> ToolResult {
        let args: TerminalArgs = match parse_args(TERMINAL, args) {
            Ok(a) => a,
            Err(e) => return e,
        };
        if !ctx.env.capabilities().can_run_commands() {
            return ToolResult::err(format!(
                "The {} environment cannot run commands",
                ctx.env.kind()
            ));
        }

        tracing::debug!(env = ctx.env.id(), command = %args.command, "terminal tool");
        let options = CommandOptions::with_timeout(ctx.command_timeout);
        match ctx.env.run_command(&args.command, options).await {
            Ok(out) if out.success() => ToolResult::ok(out.combined()),
            Ok(out) => ToolResult::err(format!(
                "Command exited with code {}\n{}",
                out.exit_code,
                out.combined()
            )),
            Err(SandboxError::Timeout(ms)) => {
                ToolResult::err(format!("Command timed out after {} ms", ms))
            }
            Err(e) => ToolResult::err(e.to_string()),
        }
    }
}

// ── createOrUpdateFiles ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct FileArg {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct CreateOrUpdateFilesArgs {
    files: Vec<FileArg>,
}

/// Writes files to the environment and records them in the run's file map.
pub struct CreateOrUpdateFilesTool;

#[async_trait]
impl Tool for CreateOrUpdateFilesTool {
    fn name(&self) -> &str {
        CREATE_OR_UPDATE_FILES
    }

    fn description(&self) -> &str {
        "Create or overwrite files in the project. Paths are relative to the project root."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        let mut file_props = HashMap::new();
        file_props.insert("path".to_string(), ParameterSchema::string(None));
        file_props.insert("content".to_string(), ParameterSchema::string(None));
        let file = ParameterSchema::object(
            None,
            file_props,
            vec!["path".to_string(), "content".to_string()],
        );

        let mut props = HashMap::new();
        props.insert("files".to_string(), ParameterSchema::array(None, file));
        ParameterSchema::object(None, props, vec!["files".to_string()])
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> ToolResult {
        let args: CreateOrUpdateFilesArgs = match parse_args(CREATE_OR_UPDATE_FILES, args) {
            Ok(a) => a,
            Err(e) => return e,
        };
        if args.files.is_empty() {
            return ToolResult::err("No files given");
        }

        let mut written = Vec::new();
        let mut failed = Vec::new();
        for file in args.files {
            // One key per file however the model spells its path.
            let path = match validate_path(ctx.env.root(), &file.path) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(path = %file.path, error = %e, "file write rejected");
                    failed.push(format!("{}: {}", file.path, e));
                    continue;
                }
            };
            match ctx.env.write_file(&path, &file.content).await {
                Ok(()) => {
                    ctx.record_file(&path, &file.content);
                    ctx.emit(EventPayload::FileCreated {
                        path: path.clone(),
                        bytes: file.content.len(),
                    });
                    written.push(path);
                }
                Err(e) => {
                    tracing::warn!(path = %file.path, error = %e, "file write rejected");
                    failed.push(format!("{}: {}", file.path, e));
                }
            }
        }

        if written.is_empty() {
            return ToolResult::err(format!("No files written.\n{}", failed.join("\n")));
        }
        let mut output = format!("Updated {} file(s): {}", written.len(), written.join(", "));
        if !failed.is_empty() {
            output.push_str(&format!("\nFailed:\n{}", failed.join("\n")));
        }
        ToolResult::ok(output)
    }
}

// ── readFiles ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ReadFilesArgs {
    files: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ReadFileResult {
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Reads files from the environment.
pub struct ReadFilesTool;

#[async_trait]
impl Tool for ReadFilesTool {
    fn name(&self) -> &str {
        READ_FILES
    }

    fn description(&self) -> &str {
        "Read files from the project. Returns a JSON array of {path, content}."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        let mut props = HashMap::new();
        props.insert(
            "files".to_string(),
            ParameterSchema::array(None, ParameterSchema::string(None)),
        );
        ParameterSchema::object(None, props, vec!["files".to_string()])
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> ToolResult {
        let args: ReadFilesArgs = match parse_args(READ_FILES, args) {
            Ok(a) => a,
            Err(e) => return e,
        };

        let results: Vec<ReadFileResult> = ctx
            .env
            .read_files(&args.files)
            .await
            .into_iter()
            .map(|(path, res)| match res {
                Ok(content) => ReadFileResult {
                    path,
                    content: Some(content),
                    error: None,
                },
                Err(e) => ReadFileResult {
                    path,
                    content: None,
                    error: Some(e.to_string()),
                },
            })
            .collect();

        match serde_json::to_string(&results) {
            Ok(json) => ToolResult::ok(json),
            Err(e) => ToolResult::err(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trait_def::SharedFiles;
    use appforge_sandbox::{CommandHandler, CommandOutput, ExecutionEnvironment, MemoryEnvironment};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn context(
        env: MemoryEnvironment,
    ) -> (ToolContext, mpsc::UnboundedReceiver<EventPayload>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ToolContext::new(Arc::new(env), SharedFiles::default(), tx), rx)
    }

    #[tokio::test]
    async fn test_create_files_records_and_emits() {
        let (ctx, mut rx) = context(MemoryEnvironment::new("t1"));
        let registry = generation_tools();

        let result = registry
            .execute(
                CREATE_OR_UPDATE_FILES,
                &ctx,
                json!({"files": [
                    {"path": "app/page.tsx", "content": "export default 1"},
                    {"path": "../evil", "content": "x"}
                ]}),
            )
            .await;

        assert!(result.success);
        let output = result.output.unwrap();
        assert!(output.contains("Updated 1 file(s): app/page.tsx"));
        assert!(output.contains("../evil"));
        assert_eq!(ctx.files_snapshot().len(), 1);
        assert_eq!(
            ctx.env.read_file("app/page.tsx").await.unwrap(),
            "export default 1"
        );
        match rx.try_recv().unwrap() {
            EventPayload::FileCreated { path, bytes } => {
                assert_eq!(path, "app/page.tsx");
                assert_eq!(bytes, 16);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_same_file_under_two_spellings_keeps_one_entry() {
        let (ctx, mut rx) = context(MemoryEnvironment::new("t5"));

        for (path, content) in [
            ("./app/page.tsx", "old"),
            ("app/page.tsx", "new"),
            ("/workspace/app//page.tsx", "newest"),
        ] {
            let result = CreateOrUpdateFilesTool
                .execute(&ctx, json!({"files": [{"path": path, "content": content}]}))
                .await;
            assert!(result.success);
        }

        let files = ctx.files_snapshot();
        assert_eq!(files.len(), 1);
        assert_eq!(files.get("app/page.tsx").map(String::as_str), Some("newest"));
        assert_eq!(ctx.env.read_file("app/page.tsx").await.unwrap(), "newest");
        while let Ok(event) = rx.try_recv() {
            match event {
                EventPayload::FileCreated { path, .. } => assert_eq!(path, "app/page.tsx"),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_read_files_reports_missing() {
        let env = MemoryEnvironment::new("t2");
        env.write_file("a.txt", "A").await.unwrap();
        let (ctx, _rx) = context(env);

        let result = ReadFilesTool
            .execute(&ctx, json!({"files": ["a.txt", "b.txt"]}))
            .await;
        let parsed: Value = serde_json::from_str(&result.output.unwrap()).unwrap();
        assert_eq!(parsed[0]["content"], "A");
        assert!(parsed[1]["error"].as_str().unwrap().contains("Not found"));
    }

    #[tokio::test]
    async fn test_terminal_refuses_without_command_support() {
        let (ctx, _rx) = context(MemoryEnvironment::new("t3"));
        let result = TerminalTool
            .execute(&ctx, json!({"command": "npm install"}))
            .await;
        assert!(result.error.unwrap().contains("cannot run commands"));
    }

    #[tokio::test]
    async fn test_terminal_reports_exit_code() {
        let handler: CommandHandler = Arc::new(|cmd, _| CommandOutput {
            stdout: String::new(),
            stderr: format!("{}: not found", cmd),
            exit_code: 127,
        });
        let (ctx, _rx) = context(MemoryEnvironment::new("t4").with_command_handler(handler));

        let result = TerminalTool.execute(&ctx, json!({"command": "foo"})).await;
        let error = result.error.unwrap();
        assert!(error.starts_with("Command exited with code 127"));
        assert!(error.contains("foo: not found"));
    }

    #[test]
    fn test_tool_names_in_order() {
        assert_eq!(
            generation_tools().names(),
            vec!["terminal", "createOrUpdateFiles", "readFiles"]
        );
    }
}
