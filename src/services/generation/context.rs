//! Context Assembly
//!
//! Builds the message list for the generation call in a fixed order:
//! crawled page content, research findings, recent history, then the prompt.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;

use appforge_llm::Message;

use crate::models::{HistoryMessage, HistoryRole};
use crate::services::web::{extract_urls, CrawledPage, Crawler};

/// Crawl the first `max_urls` URLs in `prompt`, each raced against `timeout`.
/// Failed or slow crawls are dropped; the rest keep prompt order.
pub async fn crawl_prompt_urls(
    crawler: &Arc<dyn Crawler>,
    prompt: &str,
    max_urls: usize,
    timeout: Duration,
) -> Vec<CrawledPage> {
    let urls = extract_urls(prompt, max_urls);
    if urls.is_empty() {
        return Vec::new();
    }
    tracing::debug!(count = urls.len(), "crawling prompt urls");
    let crawls = urls.iter().map(|url| async move {
        match tokio::time::timeout(timeout, crawler.crawl(url)).await {
            Ok(Ok(page)) => Some(page),
            Ok(Err(e)) => {
                tracing::warn!(url = %url, error = %e, "crawl failed");
                None
            }
            Err(_) => {
                tracing::warn!(
                    url = %url,
                    timeout_ms = timeout.as_millis() as u64,
                    "crawl timed out"
                );
                None
            }
        }
    });
    join_all(crawls).await.into_iter().flatten().collect()
}

/// Inputs to [`assemble_messages`].
#[derive(Debug, Default)]
pub struct ContextParts<'a> {
    pub crawled: &'a [CrawledPage],
    pub research: Option<&'a str>,
    /// Oldest first
    pub history: &'a [HistoryMessage],
    pub history_window: usize,
    pub prompt: &'a str,
}

/// Message list for the generation call.
pub fn assemble_messages(parts: ContextParts<'_>) -> Vec<Message> {
    let mut messages = Vec::new();

    if !parts.crawled.is_empty() {
        let mut block = String::from("Content of the pages referenced in the request:\n");
        for page in parts.crawled {
            block.push_str(&format!("\n## {}\n\n{}\n", page.url, page.content.trim()));
        }
        messages.push(Message::user(block));
    }

    if let Some(findings) = parts.research.filter(|f| !f.trim().is_empty()) {
        messages.push(Message::user(findings.to_string()));
    }

    let skip = parts.history.len().saturating_sub(parts.history_window);
    for entry in &parts.history[skip..] {
        messages.push(match entry.role {
            HistoryRole::User => Message::user(entry.content.clone()),
            HistoryRole::Assistant => Message::assistant(entry.content.clone()),
        });
    }

    messages.push(Message::user(parts.prompt.to_string()));
    messages
}
