//! Fetching subscription bodies.
//!
//! The pipeline only needs "bytes for a URL"; [`SubscriptionFetcher`] is that
//! seam. [`HttpFetcher`] is the reqwest-backed default and [`StaticFetcher`]
//! serves canned bodies.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Proxy, StatusCode};

use crate::error::{ParseError, Result};

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT: u64 = 15;

const DEFAULT_USER_AGENT: &str = concat!("singbox-subparser/", env!("CARGO_PKG_VERSION"));

pub trait SubscriptionFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    pub timeout: Duration,
    pub user_agent: String,
    /// Upstream proxy for the fetch itself, e.g. `http://127.0.0.1:8080`
    pub proxy: Option<String>,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        HttpFetcherConfig {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &HttpFetcherConfig) -> Result<Self> {
        let mut client_builder = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone());

        if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.is_empty()) {
            let proxy = Proxy::all(proxy).map_err(|e| ParseError::Fetch {
                url: proxy.to_string(),
                reason: format!("Failed to set proxy: {}", e),
            })?;
            client_builder = client_builder.proxy(proxy);
        }

        let client = client_builder.build().map_err(|e| ParseError::Fetch {
            url: String::new(),
            reason: format!("Failed to build HTTP client: {}", e),
        })?;

        Ok(HttpFetcher { client })
    }
}

impl SubscriptionFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let fetch_err = |reason: String| ParseError::Fetch {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_err(format!("Failed to send request: {}", e)))?;

        if response.status() != StatusCode::OK {
            return Err(fetch_err(format!("HTTP error: {}", response.status())));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| fetch_err(format!("Failed to read response body: {}", e)))?;
        Ok(body.to_vec())
    }
}

/// Serves bodies from memory; unknown URLs fail like an unreachable host.
#[derive(Debug, Clone, Default)]
pub struct StaticFetcher {
    bodies: HashMap<String, Vec<u8>>,
    delays: HashMap<String, Duration>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.bodies.insert(url.to_string(), body.into());
        self
    }

    /// Delays the response for `url`, to exercise out-of-order completion.
    pub fn with_delay(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }
}

impl SubscriptionFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        if let Some(delay) = self.delays.get(url) {
            tokio::time::sleep(*delay).await;
        }
        self.bodies.get(url).cloned().ok_or_else(|| ParseError::Fetch {
            url: url.to_string(),
            reason: "no such subscription".to_string(),
        })
    }
}
