//! Generation Prompts
//!
//! System and follow-up prompts for the generation loop, and the
//! `<task_summary>` marker the model closes its work with.

use appforge_core::Framework;
use appforge_tools::{CREATE_OR_UPDATE_FILES, READ_FILES, TERMINAL};

pub const SUMMARY_OPEN: &str = "<task_summary>";
pub const SUMMARY_CLOSE: &str = "</task_summary>";

/// System prompt for the main generation call.
pub fn system_prompt(framework: Framework, can_run_commands: bool) -> String {
    let mut prompt = format!(
        "You are a senior frontend engineer building a {} application inside a prepared \
         project. The dev server is already configured; do not start it yourself.\n\n\
         Tools:\n\
         - {}: create or overwrite files, paths relative to the project root\n\
         - {}: read existing files before changing them\n",
        framework.display_name(),
        CREATE_OR_UPDATE_FILES,
        READ_FILES,
    );
    if can_run_commands {
        prompt.push_str(&format!(
            "- {}: run shell commands, e.g. `npm install <package>`\n",
            TERMINAL
        ));
    } else {
        prompt.push_str("Shell commands are not available in this environment.\n");
    }
    if framework == Framework::Nextjs {
        prompt.push_str(
            "\nUse the App Router. Import UI primitives only from `@/components/ui/`.\n",
        );
    }
    prompt.push_str(&format!(
        "\nWrite complete files, never placeholders. When you are done, reply with a short \
         description of what you built wrapped in {}...{}.",
        SUMMARY_OPEN, SUMMARY_CLOSE
    ));
    prompt
}

/// Follow-up asking the model to repair a failed build.
pub fn fix_prompt(errors: &str) -> String {
    format!(
        "The project does not build. Fix these errors, changing only what is necessary, \
         then finish with a {}...{} block.\n\n```\n{}\n```",
        SUMMARY_OPEN,
        SUMMARY_CLOSE,
        errors.trim()
    )
}

/// Follow-up asking for the missing summary.
pub fn summary_request() -> String {
    format!(
        "Summarize what you built in two or three sentences, wrapped in {}...{}. \
         Do not change any files.",
        SUMMARY_OPEN, SUMMARY_CLOSE
    )
}

/// Text inside the last `<task_summary>` block. An unclosed block runs to the end.
pub fn extract_task_summary(text: &str) -> Option<String> {
    let start = text.rfind(SUMMARY_OPEN)? + SUMMARY_OPEN.len();
    let rest = &text[start..];
    let body = match rest.find(SUMMARY_CLOSE) {
        Some(end) => &rest[..end],
        None => rest,
    };
    let body = body.trim();
    if body.is_empty() {
        None
    } else {
        Some(body.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_task_summary() {
        assert_eq!(
            extract_task_summary("done!\n<task_summary>\nA counter app.\n</task_summary>"),
            Some("A counter app.".to_string())
        );
        assert_eq!(
            extract_task_summary("<task_summary>old</task_summary> then <task_summary>new"),
            Some("new".to_string())
        );
        assert_eq!(extract_task_summary("<task_summary> </task_summary>"), None);
        assert_eq!(extract_task_summary("no marker"), None);
    }

    #[test]
    fn test_system_prompt_mentions_capabilities() {
        let with_shell = system_prompt(Framework::Nextjs, true);
        assert!(with_shell.contains("terminal"));
        assert!(with_shell.contains("@/components/ui/"));

        let without = system_prompt(Framework::Vue, false);
        assert!(without.contains("not available"));
        assert!(!without.contains("@/components/ui/"));
    }

    #[test]
    fn test_fix_prompt_embeds_errors() {
        let prompt = fix_prompt("  Module not found: './x'\n");
        assert!(prompt.contains("```\nModule not found: './x'\n```"));
    }
}
