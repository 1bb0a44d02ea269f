//! Integration Tests Module
//!
//! End-to-end tests for the AppForge generation engine. Runs go through the
//! public engine API against scripted model providers and in-memory
//! environments; no network access is needed.

// Shared fixtures
mod support;

// Full generation runs: detection, fatal errors, auto-fix, context
mod generation_test;

// Rate limit recovery through the fallback chain
mod fallback_test;

// Registry eviction and environment reuse
mod environment_test;

// Validation pipelines
mod quality_gates_test;
