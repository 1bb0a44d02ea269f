//! Path Validation
//!
//! Every backend validates paths before touching a file. Paths may be given
//! relative to the environment root or absolute under it; the validated form
//! is always root-relative with `/` separators.

use crate::error::{SandboxError, SandboxResult};

/// Longest accepted path, in bytes.
pub const MAX_PATH_BYTES: usize = 4096;

/// Validate a file path and return it relative to `root`.
///
/// Rejects empty paths, paths longer than [`MAX_PATH_BYTES`], paths
/// containing `..`, NUL, CR or LF, and absolute paths outside `root`.
pub fn validate_path(root: &str, path: &str) -> SandboxResult<String> {
    let relative = normalize(root, path)?;
    if relative.is_empty() {
        return Err(SandboxError::invalid_path(path, "path names the root directory"));
    }
    Ok(relative)
}

/// Like [`validate_path`] but accepts the root itself (returned as `""`).
pub fn validate_dir(root: &str, path: &str) -> SandboxResult<String> {
    if path.trim().is_empty() || path == "." {
        return Ok(String::new());
    }
    normalize(root, path)
}

/// Join a validated relative path onto `root`.
pub fn join_root(root: &str, relative: &str) -> String {
    let root = root.trim_end_matches('/');
    if relative.is_empty() {
        if root.is_empty() {
            "/".to_string()
        } else {
            root.to_string()
        }
    } else {
        format!("{}/{}", root, relative)
    }
}

fn normalize(root: &str, path: &str) -> SandboxResult<String> {
    if path.is_empty() {
        return Err(SandboxError::invalid_path(path, "path is empty"));
    }
    if path.len() > MAX_PATH_BYTES {
        return Err(SandboxError::invalid_path(
            truncate_for_error(path),
            format!("path exceeds {} bytes", MAX_PATH_BYTES),
        ));
    }
    if path.contains('\0') || path.contains('\r') || path.contains('\n') {
        return Err(SandboxError::invalid_path(
            path.escape_default().to_string(),
            "path contains control characters",
        ));
    }
    if path.contains("..") {
        return Err(SandboxError::invalid_path(path, "path contains '..'"));
    }

    let root = root.trim_end_matches('/');
    let rest = if path.starts_with('/') {
        if root.is_empty() {
            path
        } else if path == root {
            ""
        } else {
            path.strip_prefix(root)
                .filter(|r| r.starts_with('/'))
                .ok_or_else(|| {
                    SandboxError::invalid_path(path, "path is outside the environment root")
                })?
        }
    } else {
        path
    };

    let segments: Vec<&str> = rest
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    Ok(segments.join("/"))
}

fn truncate_for_error(path: &str) -> String {
    let mut end = 64.min(path.len());
    while !path.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &path[..end])
}
