//! Project Store
//!
//! The engine keeps no durable state of its own. Projects, conversation
//! history and fragments live behind `ProjectStore`; the in-memory
//! implementation backs tests and embedders without a database.

use async_trait::async_trait;
use dashmap::DashMap;

use appforge_core::Framework;

use crate::models::{Fragment, HistoryMessage, Project};
use crate::utils::error::{EngineError, EngineResult};

/// Durable storage the engine reads its inputs from and writes results to.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get_project(&self, project_id: &str) -> EngineResult<Project>;

    /// The last `limit` messages, oldest first.
    async fn recent_messages(&self, project_id: &str, limit: usize)
        -> EngineResult<Vec<HistoryMessage>>;

    async fn append_assistant_message(&self, project_id: &str, content: &str) -> EngineResult<()>;

    async fn append_fragment(&self, project_id: &str, fragment: Fragment) -> EngineResult<()>;

    async fn update_framework(&self, project_id: &str, framework: Framework) -> EngineResult<()>;
}

#[derive(Debug, Clone)]
struct ProjectRecord {
    project: Project,
    messages: Vec<HistoryMessage>,
    fragments: Vec<Fragment>,
}

/// `ProjectStore` over a concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryProjectStore {
    records: DashMap<String, ProjectRecord>,
}

impl InMemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a project, keeping nothing of a previous record.
    pub fn insert_project(&self, project: Project) {
        self.records.insert(
            project.id.clone(),
            ProjectRecord {
                project,
                messages: Vec::new(),
                fragments: Vec::new(),
            },
        );
    }

    /// Append a user message, as the chat surface would before a run.
    pub fn push_user_message(&self, project_id: &str, content: &str) -> EngineResult<()> {
        self.with_record(project_id, |r| r.messages.push(HistoryMessage::user(content)))
    }

    pub fn project(&self, project_id: &str) -> Option<Project> {
        self.records.get(project_id).map(|r| r.project.clone())
    }

    pub fn messages(&self, project_id: &str) -> Vec<HistoryMessage> {
        self.records
            .get(project_id)
            .map(|r| r.messages.clone())
            .unwrap_or_default()
    }

    pub fn fragments(&self, project_id: &str) -> Vec<Fragment> {
        self.records
            .get(project_id)
            .map(|r| r.fragments.clone())
            .unwrap_or_default()
    }

    fn with_record<T>(
        &self,
        project_id: &str,
        f: impl FnOnce(&mut ProjectRecord) -> T,
    ) -> EngineResult<T> {
        let mut record = self
            .records
            .get_mut(project_id)
            .ok_or_else(|| project_not_found(project_id))?;
        Ok(f(record.value_mut()))
    }
}

fn project_not_found(project_id: &str) -> EngineError {
    EngineError::not_found(format!("Project not found: {}", project_id))
}

#[async_trait]
impl ProjectStore for InMemoryProjectStore {
    async fn get_project(&self, project_id: &str) -> EngineResult<Project> {
        self.project(project_id)
            .ok_or_else(|| project_not_found(project_id))
    }

    async fn recent_messages(
        &self,
        project_id: &str,
        limit: usize,
    ) -> EngineResult<Vec<HistoryMessage>> {
        self.with_record(project_id, |r| {
            let start = r.messages.len().saturating_sub(limit);
            r.messages[start..].to_vec()
        })
    }

    async fn append_assistant_message(&self, project_id: &str, content: &str) -> EngineResult<()> {
        self.with_record(project_id, |r| {
            r.messages.push(HistoryMessage::assistant(content))
        })
    }

    async fn append_fragment(&self, project_id: &str, fragment: Fragment) -> EngineResult<()> {
        self.with_record(project_id, |r| {
            if fragment.environment_id.is_some() {
                r.project.environment_id = fragment.environment_id.clone();
            }
            r.fragments.push(fragment);
        })
    }

    async fn update_framework(&self, project_id: &str, framework: Framework) -> EngineResult<()> {
        self.with_record(project_id, |r| r.project.framework = Some(framework))
    }
}
