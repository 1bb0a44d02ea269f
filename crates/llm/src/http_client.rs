//! HTTP Client Factory
//!
//! Builds reqwest clients with proxy support. Shared by the model providers,
//! the remote sandbox client, and the web crawler.

use appforge_core::proxy::ProxyConfig;

use crate::types::{LlmError, LlmResult};

/// Build a `reqwest::Client` with the resolved proxy configuration.
///
/// - `Some(proxy)` -> configure proxy on the client
/// - `None` -> explicitly disable proxy (`no_proxy`), ignoring env vars
pub fn build_http_client(proxy: Option<&ProxyConfig>) -> LlmResult<reqwest::Client> {
    http_client_builder(proxy)?
        .build()
        .map_err(|e| LlmError::NetworkError {
            message: format!("failed to build http client: {}", e),
        })
}

/// Client builder with the proxy settings applied, for callers that need
/// their own timeouts or redirect policy on top.
pub fn http_client_builder(proxy: Option<&ProxyConfig>) -> LlmResult<reqwest::ClientBuilder> {
    let mut builder = reqwest::Client::builder();
    match proxy {
        Some(cfg) => {
            let url = cfg.url();
            let mut p = reqwest::Proxy::all(&url).map_err(|e| LlmError::Other {
                message: format!("invalid proxy url {}: {}", url, e),
            })?;
            if let (Some(u), Some(pw)) = (&cfg.username, &cfg.password) {
                p = p.basic_auth(u, pw);
            }
            builder = builder.proxy(p);
        }
        None => {
            builder = builder.no_proxy();
        }
    }
    Ok(builder)
}
