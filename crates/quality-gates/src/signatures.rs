//! Error Signatures
//!
//! Patterns that mark model output as describing a broken build or runtime
//! error even when the build gate itself passed (for example when the model
//! ran the dev server through the terminal and pasted its errors).

use std::sync::OnceLock;

use regex::RegexSet;

const SIGNATURES: &[&str] = &[
    r"(?i)\bmodule not found\b",
    r"(?i)\bcannot find module\b",
    r"(?i)\bfailed to compile\b",
    r"(?i)\bbuild failed\b",
    r"\bSyntaxError\b",
    r"\bTypeError\b",
    r"\bReferenceError\b",
    r"(?i)\btype error:",
    r"(?i)\bunexpected token\b",
    r"\bis not defined\b",
    r"(?i)\bhydration (failed|error|mismatch)\b",
    r"npm ERR!",
    r"\berror TS\d{4}\b",
];

fn signature_set() -> Option<&'static RegexSet> {
    static SET: OnceLock<Option<RegexSet>> = OnceLock::new();
    SET.get_or_init(|| RegexSet::new(SIGNATURES).ok()).as_ref()
}

/// Whether `text` contains any known error signature.
pub fn has_error_signature(text: &str) -> bool {
    signature_set().map(|set| set.is_match(text)).unwrap_or(false)
}

/// The patterns `text` matches, for diagnostics.
pub fn matched_signatures(text: &str) -> Vec<&'static str> {
    match signature_set() {
        Some(set) => set.matches(text).iter().map(|i| SIGNATURES[i]).collect(),
        None => Vec::new(),
    }
}
