//! Error Classification
//!
//! Maps a provider error to the retry class that drives the fallback ladder.
//! Classification looks only at the error's message text, so errors from any
//! transport (HTTP status bodies, mid-stream error chunks, SDK messages)
//! classify the same way.

use regex::Regex;
use std::sync::OnceLock;

use crate::types::LlmError;

/// Retry class of a failed provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    RateLimit,
    ModelNotFound,
    InvalidRequest,
    ServerError,
    /// Not retryable
    Fatal,
}

struct ClassPatterns {
    rate_limit: Regex,
    model_not_found: Regex,
    invalid_request: Regex,
    server_error: Regex,
}

fn patterns() -> &'static Option<ClassPatterns> {
    static PATTERNS: OnceLock<Option<ClassPatterns>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        Some(ClassPatterns {
            rate_limit: Regex::new(
                r"(?i)rate[ _-]?limit|too many requests|\b429\b|quota exceeded|resource[ _]exhausted|tokens per min",
            )
            .ok()?,
            model_not_found: Regex::new(
                r"(?i)model[ _]not[ _]found|no such model|unknown model|model .*does not exist|no endpoints found|not a valid model",
            )
            .ok()?,
            invalid_request: Regex::new(
                r"(?i)invalid[ _]request|bad request|\b400\b|\b422\b|unsupported (parameter|value)|invalid[ _]argument|unrecognized request argument",
            )
            .ok()?,
            server_error: Regex::new(
                r"(?i)server error|internal error|\b50[0234]\b|bad gateway|service unavailable|gateway timeout|overloaded|upstream connect",
            )
            .ok()?,
        })
    })
}

/// Classify an error message.
///
/// Checked in priority order: rate limit, model not found, invalid request,
/// server error. A message matching nothing is fatal.
pub fn classify_message(message: &str) -> ErrorClass {
    let Some(p) = patterns() else {
        return ErrorClass::Fatal;
    };
    if p.rate_limit.is_match(message) {
        ErrorClass::RateLimit
    } else if p.model_not_found.is_match(message) {
        ErrorClass::ModelNotFound
    } else if p.invalid_request.is_match(message) {
        ErrorClass::InvalidRequest
    } else if p.server_error.is_match(message) {
        ErrorClass::ServerError
    } else {
        ErrorClass::Fatal
    }
}

/// Classify an `LlmError` by its display text.
pub fn classify(error: &LlmError) -> ErrorClass {
    classify_message(&error.to_string())
}
