//! AppForge Tools
//!
//! Tool-calling support for the generation loop:
//! - `ToolResult` - execution result type
//! - `Tool` trait and `ToolRegistry` - dynamic registration and dispatch
//! - `ToolContext` - the environment, file map and side-event queue a tool sees
//! - `builtin` - the `terminal`, `createOrUpdateFiles` and `readFiles` tools

pub mod builtin;
pub mod executor;
pub mod trait_def;

pub use builtin::{
    generation_tools, CreateOrUpdateFilesTool, ReadFilesTool, TerminalTool,
    CREATE_OR_UPDATE_FILES, READ_FILES, TERMINAL,
};
pub use executor::{truncate_tail, ToolResult, MAX_OUTPUT_BYTES};
pub use trait_def::{
    parse_args, SharedFiles, Tool, ToolContext, ToolRegistry, DEFAULT_COMMAND_TIMEOUT,
};
