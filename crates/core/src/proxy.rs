//! Proxy Configuration Types
//!
//! Proxy settings shared by every outbound HTTP client in the workspace
//! (model providers, the remote sandbox client, the crawler). The client
//! factory itself lives in `appforge-llm`.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Proxy protocol type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks5,
}

impl ProxyProtocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks5 => "socks5",
        }
    }
}

/// Proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub protocol: ProxyProtocol,
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Never written back out when a config is serialized.
    #[serde(skip_serializing, default)]
    pub password: Option<String>,
}

impl ProxyConfig {
    /// Proxy URL without credentials.
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol.scheme(), self.host, self.port)
    }

    /// Parse `scheme://[user[:pass]@]host:port`.
    pub fn parse(raw: &str) -> CoreResult<Self> {
        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| CoreError::config(format!("proxy url '{}' has no scheme", raw)))?;
        let protocol = match scheme.to_lowercase().as_str() {
            "http" => ProxyProtocol::Http,
            "https" => ProxyProtocol::Https,
            "socks5" | "socks5h" => ProxyProtocol::Socks5,
            other => {
                return Err(CoreError::config(format!(
                    "unsupported proxy scheme '{}'",
                    other
                )))
            }
        };

        let (auth, host_port) = match rest.rsplit_once('@') {
            Some((auth, host_port)) => (Some(auth), host_port),
            None => (None, rest),
        };
        let (host, port) = host_port
            .trim_end_matches('/')
            .rsplit_once(':')
            .ok_or_else(|| CoreError::config(format!("proxy url '{}' has no port", raw)))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| CoreError::config(format!("invalid proxy port '{}'", port)))?;
        if host.is_empty() {
            return Err(CoreError::config("proxy host is empty"));
        }

        let (username, password) = match auth {
            Some(auth) => match auth.split_once(':') {
                Some((u, p)) => (Some(u.to_string()), Some(p.to_string())),
                None => (Some(auth.to_string()), None),
            },
            None => (None, None),
        };

        Ok(Self {
            protocol,
            host: host.to_string(),
            port,
            username,
            password,
        })
    }
}
