//! Environment Lifecycle Integration Tests
//!
//! Idle eviction in the registry, and how a run treats the project's
//! previous environment and the preview URL.

use std::sync::Arc;
use std::time::Duration;

use appforge::core::{EventPayload, Framework};
use appforge::llm::LlmResponse;
use appforge::sandbox::{
    EnvironmentKind, EnvironmentRegistry, ExecutionEnvironment, MemoryEnvironmentFactory,
};
use appforge::{GenerationRequest, Project};

use super::support::{
    builder_model, collect, scripted_build, summary, terminal, write_files, HarnessBuilder,
    ScriptedFactory,
};

const TTL: Duration = Duration::from_secs(120);
const EPSILON: Duration = Duration::from_millis(1);

// ============================================================================
// Registry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_idle_environment_lives_exactly_one_ttl() {
    let factory = Arc::new(MemoryEnvironmentFactory::new());
    let registry = EnvironmentRegistry::with_ttl(TTL).with_factory(factory.clone());
    registry.open();

    let env = registry
        .create(EnvironmentKind::InMemory, Framework::Nextjs)
        .await
        .unwrap();
    let id = env.id().to_string();
    drop(env);

    tokio::time::advance(TTL - EPSILON).await;
    assert!(registry.contains(&id));

    tokio::time::advance(EPSILON * 2).await;
    assert!(!registry.contains(&id));
    assert!(registry.get(&id).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_evicted_environment_cannot_be_reconnected() {
    let factory = Arc::new(MemoryEnvironmentFactory::new());
    let registry = EnvironmentRegistry::with_ttl(TTL).with_factory(factory.clone());
    registry.open();

    let id = registry
        .create(EnvironmentKind::InMemory, Framework::Vue)
        .await
        .unwrap()
        .id()
        .to_string();

    tokio::time::sleep(TTL + EPSILON).await;

    assert!(registry.is_empty());
    assert!(!factory.environment(&id).unwrap().is_active());
    assert!(registry.connect(EnvironmentKind::InMemory, &id).await.is_err());
}

#[tokio::test]
async fn test_close_disposes_everything() {
    let factory = Arc::new(MemoryEnvironmentFactory::new());
    let registry = EnvironmentRegistry::new().with_factory(factory.clone());
    registry.open();
    let a = registry.create(EnvironmentKind::InMemory, Framework::React).await.unwrap();
    let b = registry.create(EnvironmentKind::InMemory, Framework::Svelte).await.unwrap();

    registry.close().await;

    assert!(registry.is_empty());
    assert!(!a.is_active());
    assert!(!b.is_active());
    assert!(registry.create(EnvironmentKind::InMemory, Framework::React).await.is_err());
}

// ============================================================================
// Runs
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_run_replaces_an_evicted_environment() {
    let harness = HarnessBuilder::new(builder_model()).idle_ttl(TTL).build();
    let stale = harness
        .registry
        .create(EnvironmentKind::InMemory, Framework::Nextjs)
        .await
        .unwrap()
        .id()
        .to_string();
    let mut project = Project::new("p-evicted", "Landing").with_framework(Framework::Nextjs);
    project.environment_id = Some(stale.clone());
    harness.store.insert_project(project);

    tokio::time::sleep(TTL + EPSILON).await;

    let events = harness.run(GenerationRequest::new("p-evicted", "Build a landing page")).await;

    assert!(matches!(terminal(&events)[..], [EventPayload::Complete { .. }]));
    let fragments = harness.store.fragments("p-evicted");
    let used = fragments[0].environment_id.clone().unwrap();
    assert_ne!(used, stale);
    assert!(harness.registry.contains(&used));
}

#[tokio::test(start_paused = true)]
async fn test_preview_url_comes_from_dev_server() {
    let (handler, _) = scripted_build(0);
    let harness = HarnessBuilder::new(builder_model())
        .environments(
            MemoryEnvironmentFactory::new()
                .with_command_handler(handler)
                .with_background_processes(),
        )
        .build();
    harness
        .store
        .insert_project(Project::new("p-preview", "Preview").with_framework(Framework::Vue));

    let events = harness.run(GenerationRequest::new("p-preview", "Build a counter")).await;

    let url = events.iter().find_map(|e| match &e.payload {
        EventPayload::Complete { sandbox_url, .. } => sandbox_url.clone(),
        _ => None,
    });
    let env_id = harness.store.fragments("p-preview")[0]
        .environment_id
        .clone()
        .unwrap();
    assert_eq!(
        url,
        Some(format!("http://{}.localhost:{}", env_id, Framework::Vue.dev_port()))
    );
    let log = harness.environments.environment(&env_id).unwrap().command_log();
    assert!(log.iter().any(|c| c.contains("npm run build")));
    assert!(log.iter().any(|c| c.starts_with("npm run dev")));
}

#[tokio::test]
async fn test_new_environment_uses_the_detected_template() {
    let factory = ScriptedFactory::new(|call| {
        if call.is_classification() {
            return Ok(LlmResponse::text("scripted-model", "vue"));
        }
        if call.after_tool_result() {
            return Ok(summary("A Vue counter."));
        }
        Ok(write_files(&[("src/App.vue", "<template><p>0</p></template>\n")]))
    });
    let harness = HarnessBuilder::new(factory).build();
    harness.store.insert_project(Project::new("p-template", "Counter"));

    let events = collect(harness.engine.run(GenerationRequest::new(
        "p-template",
        "Build a counter with Vue",
    )))
    .await;

    assert!(matches!(
        terminal(&events)[..],
        [EventPayload::Complete { framework: Framework::Vue, .. }]
    ));
    let env_id = harness.store.fragments("p-template")[0]
        .environment_id
        .clone()
        .unwrap();
    let env = harness.environments.environment(&env_id).unwrap();
    assert_eq!(env.template(), Some(Framework::Vue));
}

#[tokio::test]
async fn test_stored_framework_reuses_live_environment() {
    let harness = HarnessBuilder::new(builder_model()).build();
    let live = harness
        .registry
        .create(EnvironmentKind::InMemory, Framework::Nextjs)
        .await
        .unwrap()
        .id()
        .to_string();
    let mut project = Project::new("p-reuse", "Reuse").with_framework(Framework::Nextjs);
    project.environment_id = Some(live.clone());
    harness.store.insert_project(project);

    let events = harness.run(GenerationRequest::new("p-reuse", "Add a footer")).await;

    assert!(matches!(terminal(&events)[..], [EventPayload::Complete { .. }]));
    let fragments = harness.store.fragments("p-reuse");
    assert_eq!(fragments[0].environment_id.as_deref(), Some(live.as_str()));
}
