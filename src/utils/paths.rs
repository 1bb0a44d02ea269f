//! Configuration Paths
//!
//! Resolves where the engine looks for its configuration file.

use std::path::PathBuf;

use crate::utils::error::{EngineError, EngineResult};

/// Directory name under the platform config directory.
pub const APP_DIR: &str = "appforge";
/// Configuration file name.
pub const CONFIG_FILE: &str = "config.toml";

/// Platform configuration directory for the engine
/// (e.g. `~/.config/appforge` on Linux).
pub fn config_dir() -> EngineResult<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .ok_or_else(|| EngineError::config("Could not determine config directory"))
}

/// Default configuration file path.
pub fn config_path() -> EngineResult<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE))
}
