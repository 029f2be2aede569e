//! Subscription feed fetching
//!
//! A subscription is a URL serving a list of proxy links, either as plain
//! text or base64-encoded text. Fetching is best effort per source: one
//! broken feed never prevents the others from loading.

use crate::proxy::models::Candidate;
use crate::proxy::parser::LinkParser;
use crate::Result;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use std::time::Duration;
use tracing::{info, warn};

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default user agent for HTTP requests
const DEFAULT_USER_AGENT: &str = "proxy-verify/0.1";

/// Regex pattern to match proxy links embedded in arbitrary text
static LINK_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:vless|vmess|trojan|ss|socks5?|https?)://[^\s<>]+")
        .expect("Invalid link regex")
});

/// Result of fetching a single subscription
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// The subscription URL
    pub source: String,
    /// Candidates extracted from the feed
    pub candidates: Vec<Candidate>,
    /// Error message if fetching failed
    pub error: Option<String>,
}

impl FetchResult {
    pub fn success(source: String, candidates: Vec<Candidate>) -> Self {
        Self {
            source,
            candidates,
            error: None,
        }
    }

    pub fn failure(source: String, error: String) -> Self {
        Self {
            source,
            candidates: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Configuration for subscription fetching
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// Timeout for HTTP requests
    pub timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: String,
    /// Scheme used for bare `host:port` lines
    pub default_scheme: String,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            default_scheme: "http".to_string(),
        }
    }
}

impl SubscriptionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_default_scheme(mut self, scheme: String) -> Self {
        self.default_scheme = scheme;
        self
    }
}

/// Fetches subscription feeds and turns them into candidates
pub struct SubscriptionFetcher {
    config: SubscriptionConfig,
    client: Client,
}

impl SubscriptionFetcher {
    pub fn new() -> Result<Self> {
        Self::with_config(SubscriptionConfig::default())
    }

    pub fn with_config(config: SubscriptionConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self { config, client })
    }

    /// Fetch and parse a single subscription URL
    pub async fn fetch(&self, url: &str) -> Result<Vec<Candidate>> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let content = response.text().await?;
        Ok(self.parse_feed(&content))
    }

    /// Fetch every subscription, returning a result per source
    pub async fn fetch_all(&self, urls: &[String]) -> Vec<FetchResult> {
        let mut results = Vec::with_capacity(urls.len());

        for url in urls {
            let result = match self.fetch(url).await {
                Ok(candidates) => {
                    info!("Loaded {} links from subscription {}", candidates.len(), url);
                    FetchResult::success(url.clone(), candidates)
                }
                Err(e) => {
                    warn!("Failed to fetch subscription {}: {}", url, e);
                    FetchResult::failure(url.clone(), e.to_string())
                }
            };
            results.push(result);
        }

        results
    }

    /// Parse a feed body, decoding base64 when the body is not plain links
    pub fn parse_feed(&self, content: &str) -> Vec<Candidate> {
        let text = if content.contains("://") {
            content.to_string()
        } else {
            decode_base64_text(content).unwrap_or_else(|| content.to_string())
        };

        let candidates = LinkParser::parse_string(&text, &self.config.default_scheme);
        if !candidates.is_empty() {
            return candidates;
        }

        LinkParser::dedup(
            LINK_REGEX
                .find_iter(&text)
                .map(|m| Candidate::from_link(m.as_str())),
        )
    }
}

/// Decode a base64 body in any of the common alphabets/padding variants
pub fn decode_base64_text(content: &str) -> Option<String> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }

    [&STANDARD, &STANDARD_NO_PAD, &URL_SAFE, &URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(compact.as_bytes()).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok())
}
