//! Generation Run Integration Tests
//!
//! Full runs through the engine with a scripted model and in-memory
//! environments: framework detection, fatal errors, auto-fix, and prompt
//! URL crawling.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use appforge::core::{EventPayload, Framework};
use appforge::llm::LlmResponse;
use appforge::sandbox::MemoryEnvironmentFactory;
use appforge::services::web::{CrawledPage, Crawler};
use appforge::{EngineError, EngineResult, GenerationRequest, Project, ProjectStore};

use super::support::{
    builder_model, collect, completed_files, scripted_build, statuses, summary, terminal,
    write_files, HarnessBuilder, ScriptedFactory, PAGE,
};

// ============================================================================
// Framework detection
// ============================================================================

#[tokio::test]
async fn test_simple_prompt_detects_framework_and_completes() {
    let harness = HarnessBuilder::new(builder_model()).build();
    harness.store.insert_project(Project::new("p-hello", "Hello"));

    let events = collect(harness.engine.run(GenerationRequest::new(
        "p-hello",
        "Create a simple hello world page with a button that shows an alert",
    )))
    .await;

    let calls = harness.factory.calls();
    assert!(calls.iter().any(|(model, _)| model == "gemini-2.5-flash"));
    assert!(calls.iter().any(|(model, _)| model == "gpt-4.1-mini"));

    assert!(events
        .iter()
        .any(|e| matches!(
            &e.payload,
            EventPayload::FileCreated { path, .. } if path == "app/page.tsx"
        )));
    let files = completed_files(&events).unwrap();
    assert_eq!(files.get("app/page.tsx").map(String::as_str), Some(PAGE));
    assert!(statuses(&events).iter().any(|s| s == "Using Next.js"));

    assert_eq!(
        harness.store.project("p-hello").unwrap().framework,
        Some(Framework::Nextjs)
    );
    assert_eq!(harness.store.fragments("p-hello").len(), 1);
    assert_eq!(
        harness.store.messages("p-hello").last().unwrap().content,
        "A hello world page with an alert button."
    );
}

#[tokio::test]
async fn test_stored_framework_skips_classification() {
    let harness = HarnessBuilder::new(builder_model()).build();
    harness
        .store
        .insert_project(Project::new("p-vue", "Todo").with_framework(Framework::Vue));

    let events = harness.run(GenerationRequest::new("p-vue", "Build a todo list")).await;

    assert!(harness
        .factory
        .calls()
        .iter()
        .all(|(model, _)| model != "gemini-2.5-flash"));
    assert!(matches!(
        terminal(&events)[..],
        [EventPayload::Complete { framework: Framework::Vue, .. }]
    ));
}

#[tokio::test]
async fn test_rewritten_file_appears_once() {
    let factory = ScriptedFactory::new(|call| {
        if call.after_tool_result() {
            return Ok(summary("Rewrote the page."));
        }
        Ok(write_files(&[("./app/page.tsx", "draft"), ("app/page.tsx", PAGE)]))
    });
    let harness = HarnessBuilder::new(factory).build();
    harness
        .store
        .insert_project(Project::new("p-twice", "Twice").with_framework(Framework::Nextjs));

    let events = harness.run(GenerationRequest::new("p-twice", "Build a page")).await;

    let files = completed_files(&events).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files.get("app/page.tsx").map(String::as_str), Some(PAGE));
    assert_eq!(harness.store.fragments("p-twice")[0].files.len(), 1);
}

// ============================================================================
// Fatal errors
// ============================================================================

#[tokio::test]
async fn test_missing_project_ends_with_error_only() {
    let harness = HarnessBuilder::new(builder_model()).build();

    let events = harness.run(GenerationRequest::new("ghost", "Build anything")).await;

    let ends = terminal(&events);
    assert_eq!(ends.len(), 1);
    match ends[0] {
        EventPayload::Error { message, code } => {
            assert!(message.contains("Project not found"));
            assert_eq!(code.as_deref(), Some("not_found"));
        }
        other => panic!("expected error, got {:?}", other),
    }
    assert!(matches!(events.last().map(|e| &e.payload), Some(EventPayload::Error { .. })));
    assert!(harness.factory.calls().is_empty());
}

#[tokio::test]
async fn test_execute_returns_the_error_it_reports() {
    let harness = HarnessBuilder::new(builder_model()).build();
    let (bus, _stream) = appforge::EventBus::channel(64);

    let result = harness
        .engine
        .execute(&GenerationRequest::new("ghost", "Build anything"), &bus)
        .await;

    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

// ============================================================================
// Validation and auto-fix
// ============================================================================

#[tokio::test]
async fn test_build_failure_is_fixed_in_one_round() {
    let (handler, builds) = scripted_build(1);
    let harness = HarnessBuilder::new(builder_model())
        .environments(MemoryEnvironmentFactory::new().with_command_handler(handler))
        .build();
    harness
        .store
        .insert_project(Project::new("p-fix", "Fix").with_framework(Framework::Nextjs));

    let events = harness.run(GenerationRequest::new("p-fix", "Build a pricing page")).await;

    let fixes: Vec<String> = statuses(&events)
        .into_iter()
        .filter(|s| s.contains("Auto-fixing"))
        .collect();
    assert_eq!(fixes, vec!["Auto-fixing build errors (attempt 1/2)".to_string()]);
    assert_eq!(builds.load(Ordering::SeqCst), 2);
    match terminal(&events)[..] {
        [EventPayload::Complete { warning, files, .. }] => {
            assert!(warning.is_none());
            assert!(!files.is_empty());
        }
        ref other => panic!("expected complete, got {:?}", other),
    }
    let fragment = &harness.store.fragments("p-fix")[0];
    assert_eq!(fragment.metadata.auto_fix_attempts, 1);
}

#[tokio::test]
async fn test_auto_fix_stops_at_its_bound() {
    let (handler, builds) = scripted_build(usize::MAX);
    let harness = HarnessBuilder::new(builder_model())
        .environments(MemoryEnvironmentFactory::new().with_command_handler(handler))
        .build();
    harness
        .store
        .insert_project(Project::new("p-broken", "Broken").with_framework(Framework::React));

    let events = harness.run(GenerationRequest::new("p-broken", "Build a dashboard")).await;

    assert_eq!(builds.load(Ordering::SeqCst), 3);
    let fragment = &harness.store.fragments("p-broken")[0];
    assert_eq!(fragment.metadata.auto_fix_attempts, 2);
    match terminal(&events)[..] {
        [EventPayload::Complete { warning: Some(warning), .. }] => {
            assert!(warning.starts_with("Validation still failing after 2 auto-fix attempt(s)"));
        }
        ref other => panic!("expected complete with a warning, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fix_prompt_carries_build_output() {
    let (handler, _) = scripted_build(1);
    let fix_requests = Arc::new(Mutex::new(Vec::new()));
    let seen = fix_requests.clone();
    let factory = ScriptedFactory::new(move |call| {
        if call.after_tool_result() {
            return Ok(summary("Fixed the page."));
        }
        let last = call.last_text();
        if last.contains("Failed to compile") {
            seen.lock().unwrap().push(last);
        }
        Ok(write_files(&[("app/page.tsx", PAGE)]))
    });
    let harness = HarnessBuilder::new(factory)
        .environments(MemoryEnvironmentFactory::new().with_command_handler(handler))
        .build();
    harness
        .store
        .insert_project(Project::new("p-prompt", "Prompt").with_framework(Framework::Nextjs));

    harness.run(GenerationRequest::new("p-prompt", "Build a page")).await;

    let requests = fix_requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].contains("Type error: Cannot find name 'alrt'."));
}

// ============================================================================
// Prompt URLs
// ============================================================================

/// Counts crawls; the page named `slow` never answers in time.
struct CountingCrawler {
    attempts: AtomicUsize,
    slow: &'static str,
}

#[async_trait]
impl Crawler for CountingCrawler {
    async fn crawl(&self, url: &str) -> EngineResult<CrawledPage> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if url == self.slow {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        Ok(CrawledPage {
            url: url.to_string(),
            content: format!("contents of {}", url),
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_prompt_urls_are_crawled_within_the_timeout() {
    let crawler = Arc::new(CountingCrawler {
        attempts: AtomicUsize::new(0),
        slow: "https://slow.example.com/docs",
    });
    let first_request = Arc::new(Mutex::new(None));
    let seen = first_request.clone();
    let factory = ScriptedFactory::new(move |call| {
        if call.after_tool_result() {
            return Ok(summary("A page styled after the reference."));
        }
        let mut first = seen.lock().unwrap();
        if first.is_none() {
            *first = call.messages.first().map(|m| m.text_content());
        }
        Ok(write_files(&[("app/page.tsx", PAGE)]))
    });
    let harness = HarnessBuilder::new(factory).crawler(crawler.clone()).build();
    harness
        .store
        .insert_project(Project::new("p-urls", "Urls").with_framework(Framework::Nextjs));

    let started = tokio::time::Instant::now();
    let events = collect(harness.engine.run(GenerationRequest::new(
        "p-urls",
        "Make a page like https://fast.example.com/home and https://..bad and https://slow.example.com/docs",
    )))
    .await;
    let elapsed = started.elapsed();

    assert_eq!(crawler.attempts.load(Ordering::SeqCst), 2);
    assert!(elapsed >= Duration::from_secs(8));
    assert!(elapsed < Duration::from_secs(60));
    assert!(matches!(terminal(&events)[..], [EventPayload::Complete { .. }]));

    let context = first_request.lock().unwrap().clone().unwrap();
    assert!(context.contains("contents of https://fast.example.com/home"));
    assert!(!context.contains("contents of https://slow.example.com/docs"));
}

// ============================================================================
// Research
// ============================================================================

const RESEARCH_PROMPT: &str = "Build a checkout page following the latest Stripe best practices";

/// Answers research subagents with JSON findings and records the first
/// generation context it sees.
fn researching_model(context: Arc<Mutex<Option<String>>>) -> ScriptedFactory {
    ScriptedFactory::new(move |call| {
        if call.last_text().contains("Respond with JSON only") {
            return Ok(LlmResponse::text(
                "scripted-model",
                r#"{"summary": "Use Stripe Checkout sessions", "keyPoints": ["Create sessions on the server"], "sources": ["https://stripe.com/docs"]}"#,
            ));
        }
        if call.after_tool_result() {
            return Ok(summary("A checkout page."));
        }
        let mut seen = context.lock().unwrap();
        if seen.is_none() {
            *seen = Some(
                call.messages
                    .iter()
                    .map(|m| m.text_content())
                    .collect::<Vec<_>>()
                    .join("\n"),
            );
        }
        Ok(write_files(&[("app/page.tsx", PAGE)]))
    })
}

#[tokio::test]
async fn test_research_findings_reach_the_context() {
    let context = Arc::new(Mutex::new(None));
    let harness = HarnessBuilder::new(researching_model(context.clone())).build();
    harness
        .store
        .insert_project(Project::new("p-research", "Shop").with_framework(Framework::Nextjs));

    let events = collect(harness.engine.run(
        GenerationRequest::new("p-research", RESEARCH_PROMPT).with_model("claude-sonnet-4"),
    ))
    .await;

    let start = events.iter().position(|e| match &e.payload {
        EventPayload::ResearchStart { task_count, task_types } => {
            *task_count == 1 && task_types == &vec!["research".to_string()]
        }
        _ => false,
    });
    let complete = events.iter().position(|e| {
        matches!(
            &e.payload,
            EventPayload::ResearchComplete { completed: 1, failed: 0, .. }
        )
    });
    assert!(start.unwrap() < complete.unwrap());
    assert!(harness
        .factory
        .calls()
        .iter()
        .any(|(model, _)| model == "gemini-2.5-flash"));

    let context = context.lock().unwrap().clone().unwrap();
    assert!(context.contains("## Research findings"));
    assert!(context.contains("Use Stripe Checkout sessions"));
    assert!(context.ends_with(RESEARCH_PROMPT));
    assert!(matches!(terminal(&events)[..], [EventPayload::Complete { .. }]));
}

#[tokio::test]
async fn test_model_without_research_support_skips_research() {
    let context = Arc::new(Mutex::new(None));
    let harness = HarnessBuilder::new(researching_model(context.clone())).build();
    harness
        .store
        .insert_project(Project::new("p-grok-r", "Shop").with_framework(Framework::Nextjs));

    let events = collect(harness.engine.run(
        GenerationRequest::new("p-grok-r", RESEARCH_PROMPT).with_model("grok-3"),
    ))
    .await;

    assert!(!events
        .iter()
        .any(|e| matches!(e.kind(), "research-start" | "research-complete")));
    assert!(harness
        .factory
        .calls()
        .iter()
        .all(|(model, _)| model == "grok-3"));
    assert!(!context.lock().unwrap().clone().unwrap().contains("Research findings"));
    assert!(matches!(terminal(&events)[..], [EventPayload::Complete { .. }]));
}

#[tokio::test]
async fn test_history_precedes_the_prompt() {
    let first_request = Arc::new(Mutex::new(Vec::new()));
    let seen = first_request.clone();
    let factory = ScriptedFactory::new(move |call| {
        let mut first = seen.lock().unwrap();
        if first.is_empty() {
            *first = call.messages.iter().map(|m| m.text_content()).collect();
        }
        Ok(LlmResponse::text("scripted-model", "<task_summary>Added dark mode.</task_summary>"))
    });
    let harness = HarnessBuilder::new(factory).build();
    harness
        .store
        .insert_project(Project::new("p-hist", "Hist").with_framework(Framework::Nextjs));
    harness.store.push_user_message("p-hist", "Build a blog").unwrap();
    harness
        .store
        .append_assistant_message("p-hist", "Built a blog.")
        .await
        .unwrap();
    harness.store.push_user_message("p-hist", "Add dark mode").unwrap();

    let events = harness.run(GenerationRequest::new("p-hist", "Add dark mode")).await;

    assert!(matches!(terminal(&events)[..], [EventPayload::Complete { .. }]));
    let messages = first_request.lock().unwrap().clone();
    assert_eq!(messages, vec!["Build a blog", "Built a blog.", "Add dark mode"]);
    // The run's summary is appended after the existing conversation.
    assert_eq!(harness.store.messages("p-hist").len(), 4);
}
