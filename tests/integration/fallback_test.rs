//! Model Fallback Integration Tests
//!
//! Rate limits during generation: gateway switch, alternate model, and the
//! fixed wait when a model has nowhere else to go.

use std::time::Duration;

use appforge::core::{EventPayload, Framework};
use appforge::llm::{LlmError, TransportClass};
use appforge::{GenerationRequest, Project};

use super::support::{
    collect, statuses, summary, terminal, write_files, HarnessBuilder, ScriptedFactory, PAGE,
};

fn rate_limited(model: &str) -> LlmError {
    LlmError::RateLimited {
        message: format!("{} is over capacity", model),
        retry_after: None,
    }
}

#[tokio::test]
async fn test_rate_limited_model_falls_back_to_alternate() {
    let factory = ScriptedFactory::new(|call| {
        if call.model == "claude-sonnet-4" {
            return Err(rate_limited(call.model));
        }
        if call.after_tool_result() {
            return Ok(summary("Built it on the smaller model."));
        }
        Ok(write_files(&[("app/page.tsx", PAGE)]))
    });
    let harness = HarnessBuilder::new(factory).fast_retries().build();
    harness
        .store
        .insert_project(Project::new("p-fallback", "Fallback").with_framework(Framework::Nextjs));

    let events = collect(harness.engine.run(
        GenerationRequest::new("p-fallback", "Build a recipe site").with_model("claude-sonnet-4"),
    ))
    .await;

    let calls = harness.factory.calls();
    assert_eq!(calls[0], ("claude-sonnet-4".to_string(), TransportClass::Direct));
    assert_eq!(calls[1], ("claude-sonnet-4".to_string(), TransportClass::Gateway));
    assert_eq!(calls[2], ("claude-3-5-haiku".to_string(), TransportClass::Direct));

    let statuses = statuses(&events);
    assert!(statuses
        .iter()
        .any(|s| s == "Rate limited on claude-sonnet-4, switching to gateway"));
    assert!(statuses
        .iter()
        .any(|s| s == "Rate limited on claude-sonnet-4, falling back to claude-3-5-haiku"));

    match terminal(&events)[..] {
        [EventPayload::Complete { summary, files, .. }] => {
            assert_eq!(summary, "Built it on the smaller model.");
            assert!(files.contains_key("app/page.tsx"));
        }
        ref other => panic!("expected complete, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_model_without_alternate_waits_then_fails() {
    let factory = ScriptedFactory::new(|call| Err(rate_limited(call.model)));
    let harness = HarnessBuilder::new(factory).build();
    harness
        .store
        .insert_project(Project::new("p-grok", "Grok").with_framework(Framework::React));

    let started = tokio::time::Instant::now();
    let events = collect(harness.engine.run(
        GenerationRequest::new("p-grok", "Build a weather widget").with_model("grok-3"),
    ))
    .await;

    assert!(started.elapsed() >= Duration::from_secs(60));
    assert_eq!(
        harness.factory.calls(),
        vec![
            ("grok-3".to_string(), TransportClass::Direct),
            ("grok-3".to_string(), TransportClass::Gateway),
            ("grok-3".to_string(), TransportClass::Gateway),
        ]
    );
    assert!(statuses(&events)
        .iter()
        .any(|s| s == "Retrying grok-3 in 60s (attempt 3/3)"));

    let ends = terminal(&events);
    assert_eq!(ends.len(), 1);
    match ends[0] {
        EventPayload::Error { message, code } => {
            assert!(message.contains("Rate limited"));
            assert_eq!(code.as_deref(), Some("model"));
        }
        other => panic!("expected error, got {:?}", other),
    }
    assert!(harness.store.fragments("p-grok").is_empty());
}

#[tokio::test]
async fn test_gateway_recovers_without_switching_model() {
    let factory = ScriptedFactory::new(|call| {
        if call.transport == TransportClass::Direct {
            return Err(rate_limited(call.model));
        }
        if call.after_tool_result() {
            return Ok(summary("Built through the gateway."));
        }
        Ok(write_files(&[("src/App.tsx", "export default () => null;\n")]))
    });
    let harness = HarnessBuilder::new(factory).fast_retries().build();
    harness
        .store
        .insert_project(Project::new("p-gw", "Gateway").with_framework(Framework::React));

    let events = collect(harness.engine.run(
        GenerationRequest::new("p-gw", "Build a timer").with_model("gpt-4.1"),
    ))
    .await;

    assert!(harness
        .factory
        .calls()
        .iter()
        .all(|(model, _)| model == "gpt-4.1"));
    assert!(matches!(terminal(&events)[..], [EventPayload::Complete { .. }]));
    assert!(!statuses(&events).iter().any(|s| s.contains("falling back")));
}
