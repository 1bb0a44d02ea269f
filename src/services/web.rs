//! Web Collaborators
//!
//! Search and crawl are best-effort inputs to context assembly: callers race
//! them against short timeouts and drop failures. The HTTP crawler converts
//! HTML to markdown and caches pages for a few minutes.

use std::net::IpAddr;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use mini_moka::sync::Cache;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::utils::error::{EngineError, EngineResult};

/// Maximum characters of page content kept per crawl.
const MAX_PAGE_CHARS: usize = 20_000;
/// Maximum download size
const MAX_DOWNLOAD_SIZE: usize = 5 * 1024 * 1024;
const MAX_REDIRECTS: usize = 5;
const FETCH_TIMEOUT_SECS: u64 = 30;
const CACHE_TTL_SECS: u64 = 10 * 60;
const MAX_CACHE_ENTRIES: u64 = 100;

/// A search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// A fetched page as markdown or plain text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawledPage {
    pub url: String,
    pub content: String,
}

/// Pluggable web search.
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> EngineResult<Vec<SearchResult>>;
}

/// Pluggable page fetcher.
#[async_trait]
pub trait Crawler: Send + Sync {
    async fn crawl(&self, url: &str) -> EngineResult<CrawledPage>;
}

fn url_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s<>"'()\[\]{}]+"#).ok())
        .as_ref()
}

/// Well-formed http(s) URLs in `text`, in order of appearance, deduplicated,
/// at most `max`.
pub fn extract_urls(text: &str, max: usize) -> Vec<String> {
    let Some(pattern) = url_pattern() else {
        return Vec::new();
    };
    let mut urls: Vec<String> = Vec::new();
    for m in pattern.find_iter(text) {
        if urls.len() >= max {
            break;
        }
        let candidate = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']);
        let Ok(parsed) = url::Url::parse(candidate) else {
            continue;
        };
        let well_formed = parsed
            .host_str()
            .is_some_and(|host| {
                host.contains('.') && host.split('.').all(|label| !label.is_empty())
            });
        if well_formed && !urls.iter().any(|u| u == candidate) {
            urls.push(candidate.to_string());
        }
    }
    urls
}

/// Hosts a crawl must never reach.
fn is_private_host(host: &str) -> bool {
    let lower = host.to_lowercase();
    if lower == "localhost" || lower.ends_with(".local") || lower.ends_with(".internal") {
        return true;
    }
    match lower.trim_matches(['[', ']']).parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
        }
        Ok(IpAddr::V6(ip)) => ip.is_loopback() || ip.is_unspecified(),
        Err(_) => false,
    }
}

fn truncate_chars(text: String, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte, _)) => {
            let mut truncated = text[..byte].to_string();
            truncated.push_str("\n\n... (content truncated)");
            truncated
        }
        None => text,
    }
}

/// Why a redirect hop is refused, if it is.
fn check_redirect(target: &url::Url, hops: usize) -> Result<(), String> {
    if hops >= MAX_REDIRECTS {
        return Err(format!("more than {} redirects", MAX_REDIRECTS));
    }
    if !matches!(target.scheme(), "http" | "https") {
        return Err(format!("redirect to unsupported scheme {}", target.scheme()));
    }
    match target.host_str() {
        Some(host) if is_private_host(host) => {
            Err(format!("redirect to private address '{}'", host))
        }
        Some(_) => Ok(()),
        None => Err("redirect target has no host".to_string()),
    }
}

/// Fetches pages over HTTP and converts HTML to markdown.
pub struct HttpCrawler {
    client: reqwest::Client,
    cache: Cache<String, String>,
}

impl HttpCrawler {
    /// Finish `builder` with the crawl timeout and a redirect policy that
    /// re-checks every hop against the private-address rules.
    pub fn new(builder: reqwest::ClientBuilder) -> EngineResult<Self> {
        let client = builder
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::custom(|attempt| {
                match check_redirect(attempt.url(), attempt.previous().len()) {
                    Ok(()) => attempt.follow(),
                    Err(reason) => attempt.error(reason),
                }
            }))
            .build()
            .map_err(|e| EngineError::web(format!("Failed to build crawl client: {}", e)))?;
        let cache = Cache::builder()
            .max_capacity(MAX_CACHE_ENTRIES)
            .time_to_live(Duration::from_secs(CACHE_TTL_SECS))
            .build();
        Ok(Self { client, cache })
    }

    fn validate(url: &str) -> EngineResult<url::Url> {
        let parsed =
            url::Url::parse(url).map_err(|e| EngineError::web(format!("Invalid URL: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(EngineError::web(format!("Unsupported scheme: {}", parsed.scheme())));
        }
        let host = parsed
            .host_str()
            .ok_or_else(|| EngineError::web("URL has no host"))?;
        if is_private_host(host) {
            return Err(EngineError::web(format!("Blocked private address '{}'", host)));
        }
        Ok(parsed)
    }
}

#[async_trait]
impl Crawler for HttpCrawler {
    async fn crawl(&self, url: &str) -> EngineResult<CrawledPage> {
        let parsed = Self::validate(url)?;
        let key = parsed.to_string();
        if let Some(content) = self.cache.get(&key) {
            return Ok(CrawledPage {
                url: url.to_string(),
                content,
            });
        }

        let mut response = self
            .client
            .get(parsed.as_str())
            .send()
            .await
            .map_err(|e| EngineError::web(format!("Failed to fetch {}: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::web(format!("HTTP {} for {}", status.as_u16(), url)));
        }
        if let Some(length) = response.content_length() {
            if length > MAX_DOWNLOAD_SIZE as u64 {
                return Err(EngineError::web(format!("{} is too large ({} bytes)", url, length)));
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();
        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| EngineError::web(format!("Failed to read {}: {}", url, e)))?
        {
            if bytes.len() + chunk.len() > MAX_DOWNLOAD_SIZE {
                return Err(EngineError::web(format!(
                    "{} is larger than {} bytes",
                    url, MAX_DOWNLOAD_SIZE
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        let body = String::from_utf8_lossy(&bytes).to_string();
        let content = if content_type.contains("text/html") || content_type.contains("xhtml") {
            htmd::convert(&body)
                .map_err(|e| EngineError::web(format!("Failed to convert {}: {}", url, e)))?
        } else {
            body
        };
        let content = truncate_chars(content, MAX_PAGE_CHARS);
        tracing::debug!(url, chars = content.len(), "page crawled");

        self.cache.insert(key, content.clone());
        Ok(CrawledPage {
            url: url.to_string(),
            content,
        })
    }
}

/// Tavily search API.
pub struct TavilySearch {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl TavilySearch {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            endpoint: "https://api.tavily.com/search".to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyHit>,
}

#[derive(Debug, Deserialize)]
struct TavilyHit {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    raw_content: Option<String>,
}

#[async_trait]
impl WebSearch for TavilySearch {
    async fn search(&self, query: &str, max_results: usize) -> EngineResult<Vec<SearchResult>> {
        let body = serde_json::json!({
            "api_key": self.api_key,
            "query": query,
            "max_results": max_results,
            "include_answer": false,
        });
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::web(format!("Search request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let err_body = response.text().await.unwrap_or_default();
            return Err(EngineError::web(format!(
                "Search API error ({}): {}",
                status.as_u16(),
                err_body
            )));
        }

        let data: TavilyResponse = response
            .json()
            .await
            .map_err(|e| EngineError::web(format!("Failed to parse search response: {}", e)))?;
        Ok(data
            .results
            .into_iter()
            .take(max_results)
            .map(|hit| SearchResult {
                url: hit.url,
                title: hit.title,
                snippet: hit.content,
                content: hit.raw_content,
            })
            .collect())
    }
}
