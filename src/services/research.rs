//! Research Subagents
//!
//! Detects prompts that need outside information and answers them with
//! short auxiliary-model calls. Every call is raced against its own timeout
//! and failures are reported in the response, never raised; the generation
//! run simply goes on without those findings.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::future::join_all;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use appforge_llm::{LlmRequestOptions, Message, ModelDescriptor, ProviderFactory};

use crate::services::web::{SearchResult, WebSearch};

/// Prompt prefix examined by [`detect_research_need`].
pub const DETECTION_WINDOW: usize = 1000;
/// Concurrent subagents per batch.
pub const MAX_CONCURRENT_SUBAGENTS: usize = 3;
/// Characters of plain-text output kept as the summary.
const FALLBACK_SUMMARY_CHARS: usize = 500;
/// Lines of plain-text output kept as key points.
const FALLBACK_KEY_POINTS: usize = 5;
const MAX_QUERY_CHARS: usize = 200;

/// What kind of lookup a subagent performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchTaskType {
    Research,
    Documentation,
    Comparison,
}

impl ResearchTaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchTaskType::Research => "research",
            ResearchTaskType::Documentation => "documentation",
            ResearchTaskType::Comparison => "comparison",
        }
    }

    fn system_prompt(&self) -> &'static str {
        match self {
            ResearchTaskType::Research => {
                "You are a research assistant helping a web developer. Find the current best \
                 practices, libraries and patterns relevant to the query."
            }
            ResearchTaskType::Documentation => {
                "You are a documentation assistant. Explain how to use the API, SDK or library \
                 in the query, with the exact imports and calls a developer needs."
            }
            ResearchTaskType::Comparison => {
                "You are a technical advisor. Compare the options named in the query and \
                 recommend one for a small web application."
            }
        }
    }
}

impl std::fmt::Display for ResearchTaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`detect_research_need`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchNeed {
    pub needs: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<ResearchTaskType>,
    pub query: String,
}

impl ResearchNeed {
    fn none() -> Self {
        Self {
            needs: false,
            task_type: None,
            query: String::new(),
        }
    }
}

fn patterns() -> &'static [(ResearchTaskType, Regex)] {
    static PATTERNS: OnceLock<Vec<(ResearchTaskType, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (
                ResearchTaskType::Comparison,
                r"(?i)\b(compare|comparison|versus|vs\.?|better than|difference between|which is better)\b",
            ),
            (
                ResearchTaskType::Documentation,
                r"(?i)\b(documentation|docs|api reference|sdk|integrat(e|ion) with|how to use)\b",
            ),
            (
                ResearchTaskType::Research,
                r"(?i)\b(research|look up|find out|best practices?|latest|current trends?|up[- ]to[- ]date|state of the art)\b",
            ),
        ]
        .into_iter()
        .filter_map(|(kind, pattern)| Regex::new(pattern).ok().map(|re| (kind, re)))
        .collect()
    })
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

/// Decide whether a prompt needs a research subagent, and of which kind.
pub fn detect_research_need(prompt: &str) -> ResearchNeed {
    let window = truncate(prompt, DETECTION_WINDOW);
    let Some(task_type) = patterns()
        .iter()
        .find(|(_, re)| re.is_match(window))
        .map(|(kind, _)| *kind)
    else {
        return ResearchNeed::none();
    };
    let normalized = window.split_whitespace().collect::<Vec<_>>().join(" ");
    ResearchNeed {
        needs: true,
        task_type: Some(task_type),
        query: truncate(&normalized, MAX_QUERY_CHARS).to_string(),
    }
}

/// One subagent call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentRequest {
    pub task_id: String,
    pub task_type: ResearchTaskType,
    pub query: String,
    pub max_results: usize,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubagentStatus {
    Complete,
    Timeout,
    Error,
    /// The model answered but not in the requested JSON shape
    Partial,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubagentFindings {
    pub summary: String,
    pub key_points: Vec<String>,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentResponse {
    pub task_id: String,
    pub status: SubagentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub findings: Option<SubagentFindings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// Parse a subagent's answer: JSON first (fences and surrounding prose
/// tolerated), plain text otherwise.
pub fn parse_findings(text: &str) -> (SubagentStatus, SubagentFindings) {
    let json = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => Some(&text[start..=end]),
        _ => None,
    };
    if let Some(findings) = json
        .and_then(|j| serde_json::from_str::<SubagentFindings>(j).ok())
        .filter(|f| !f.summary.trim().is_empty())
    {
        return (SubagentStatus::Complete, findings);
    }

    let trimmed = text.trim();
    let findings = SubagentFindings {
        summary: truncate(trimmed, FALLBACK_SUMMARY_CHARS).to_string(),
        key_points: trimmed
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .take(FALLBACK_KEY_POINTS)
            .map(str::to_string)
            .collect(),
        sources: Vec::new(),
    };
    (SubagentStatus::Partial, findings)
}

/// Render findings for the generation context. `None` when nothing usable came back.
pub fn findings_context(responses: &[SubagentResponse]) -> Option<String> {
    let sections: Vec<String> = responses
        .iter()
        .filter_map(|r| r.findings.as_ref().map(|f| (r, f)))
        .map(|(r, f)| {
            let mut section = format!("### {}\n{}", r.task_id, f.summary.trim());
            for point in &f.key_points {
                section.push_str("\n- ");
                section.push_str(point);
            }
            if !f.sources.is_empty() {
                section.push_str("\nSources: ");
                section.push_str(&f.sources.join(", "));
            }
            section
        })
        .collect();
    if sections.is_empty() {
        None
    } else {
        Some(format!("## Research findings\n\n{}", sections.join("\n\n")))
    }
}

/// Runs subagent calls on the auxiliary model.
pub struct ResearchDispatcher {
    factory: Arc<dyn ProviderFactory>,
    model: ModelDescriptor,
    search: Option<Arc<dyn WebSearch>>,
}

impl ResearchDispatcher {
    pub fn new(factory: Arc<dyn ProviderFactory>, model: ModelDescriptor) -> Self {
        Self {
            factory,
            model,
            search: None,
        }
    }

    /// Include web search results in subagent prompts.
    pub fn with_search(mut self, search: Option<Arc<dyn WebSearch>>) -> Self {
        self.search = search;
        self
    }

    /// One subagent call, bounded by `request.timeout_ms`.
    pub async fn spawn_subagent(&self, request: &SubagentRequest) -> SubagentResponse {
        let started = Instant::now();
        let timeout = Duration::from_millis(request.timeout_ms);
        let outcome = tokio::time::timeout(timeout, self.call(request)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(text)) => {
                let (status, findings) = parse_findings(&text);
                tracing::debug!(task = %request.task_id, ?status, elapsed_ms, "subagent finished");
                SubagentResponse {
                    task_id: request.task_id.clone(),
                    status,
                    findings: Some(findings),
                    error: None,
                    elapsed_ms,
                }
            }
            Ok(Err(error)) => {
                tracing::warn!(task = %request.task_id, %error, "subagent failed");
                SubagentResponse {
                    task_id: request.task_id.clone(),
                    status: SubagentStatus::Error,
                    findings: None,
                    error: Some(error),
                    elapsed_ms,
                }
            }
            Err(_) => {
                tracing::warn!(
                    task = %request.task_id,
                    timeout_ms = request.timeout_ms,
                    "subagent timed out"
                );
                SubagentResponse {
                    task_id: request.task_id.clone(),
                    status: SubagentStatus::Timeout,
                    findings: None,
                    error: Some(format!("timed out after {} ms", request.timeout_ms)),
                    elapsed_ms,
                }
            }
        }
    }

    /// Run requests in batches of [`MAX_CONCURRENT_SUBAGENTS`]; results keep request order.
    pub async fn spawn_parallel_subagents(
        &self,
        requests: &[SubagentRequest],
    ) -> Vec<SubagentResponse> {
        let mut responses = Vec::with_capacity(requests.len());
        for batch in requests.chunks(MAX_CONCURRENT_SUBAGENTS) {
            responses.extend(join_all(batch.iter().map(|r| self.spawn_subagent(r))).await);
        }
        responses
    }

    async fn call(&self, request: &SubagentRequest) -> Result<String, String> {
        let provider = self
            .factory
            .create(&self.model, self.model.default_transport)
            .map_err(|e| e.to_string())?;

        let mut prompt = format!("Query: {}\n", request.query);
        let results = self.search_results(request).await;
        if !results.is_empty() {
            prompt.push_str("\nWeb results:\n");
            for (i, hit) in results.iter().enumerate() {
                prompt.push_str(&format!(
                    "{}. {} ({})\n{}\n",
                    i + 1,
                    hit.title,
                    hit.url,
                    hit.snippet
                ));
            }
        }
        prompt.push_str(
            "\nRespond with JSON only: {\"summary\": string, \"keyPoints\": string[], \"sources\": string[]}",
        );

        let response = provider
            .send_message(
                vec![Message::user(prompt)],
                Some(request.task_type.system_prompt().to_string()),
                Vec::new(),
                LlmRequestOptions::default(),
            )
            .await
            .map_err(|e| e.to_string())?;
        response
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| "empty response".to_string())
    }

    async fn search_results(&self, request: &SubagentRequest) -> Vec<SearchResult> {
        let Some(search) = &self.search else {
            return Vec::new();
        };
        match search.search(&request.query, request.max_results).await {
            Ok(mut results) => {
                results.truncate(request.max_results);
                results
            }
            Err(e) => {
                tracing::debug!(error = %e, "web search failed, continuing without results");
                Vec::new()
            }
        }
    }
}
