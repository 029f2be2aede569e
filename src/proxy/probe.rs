//! Probe capability: one timed request through a local proxy

use crate::error::ProbeFailure;
use crate::proxy::models::ProbeResult;
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::{Client, Proxy as ReqwestProxy};
use serde_json::{Map, Value};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::trace;

/// Issues a single probe through a local proxy address. No internal retry.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, proxy: SocketAddr, timeout: Duration) -> ProbeResult;
}

/// A geo/IP provider queried by each probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoint {
    pub name: String,
    pub url: String,
}

impl ProviderEndpoint {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
        }
    }

    /// Parse a `name=url` pair
    pub fn parse(pair: &str) -> Option<Self> {
        let (name, url) = pair.split_once('=')?;
        let (name, url) = (name.trim(), url.trim());
        if name.is_empty() || !url.starts_with("http") {
            return None;
        }
        Some(Self::new(name, url))
    }

    /// Default geo/IP providers
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("ipinfo", "https://ipinfo.io/json"),
            Self::new("ipapi", "http://ip-api.com/json"),
            Self::new("ipsb", "https://api.ip.sb/geoip"),
            Self::new("ipwhois", "https://ipwho.is/"),
        ]
    }
}

/// Prober querying every provider concurrently through a SOCKS inbound.
///
/// The probe succeeds when at least one provider answers with a 2xx JSON
/// object. The payload maps provider name to its document and the latency
/// is the fastest successful response.
#[derive(Debug, Clone)]
pub struct ReqwestProber {
    providers: Vec<ProviderEndpoint>,
    user_agent: String,
}

impl ReqwestProber {
    pub fn new(providers: Vec<ProviderEndpoint>) -> Self {
        Self {
            providers,
            user_agent: "curl/8.5.0".to_string(),
        }
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    fn client(&self, proxy: SocketAddr, timeout: Duration) -> Result<Client, reqwest::Error> {
        Client::builder()
            .proxy(ReqwestProxy::all(format!("socks5h://{}", proxy))?)
            .timeout(timeout)
            .user_agent(&self.user_agent)
            .build()
    }

    async fn fetch(
        client: &Client,
        provider: &ProviderEndpoint,
    ) -> Result<(Value, u64), ProbeFailure> {
        let start = Instant::now();
        let response = client
            .get(&provider.url)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        if !response.status().is_success() {
            return Err(ProbeFailure::Status(response.status().as_u16()));
        }
        let latency_ms = start.elapsed().as_millis() as u64;

        let body = response.bytes().await.map_err(classify_reqwest_error)?;
        let document: Value = serde_json::from_slice(&body)
            .map_err(|e| ProbeFailure::MalformedPayload(e.to_string()))?;
        if !document.is_object() {
            return Err(ProbeFailure::MalformedPayload(
                "expected a JSON object".to_string(),
            ));
        }

        Ok((document, latency_ms))
    }
}

impl Default for ReqwestProber {
    fn default() -> Self {
        Self::new(ProviderEndpoint::defaults())
    }
}

#[async_trait]
impl Prober for ReqwestProber {
    async fn probe(&self, proxy: SocketAddr, timeout: Duration) -> ProbeResult {
        let client = match self.client(proxy, timeout) {
            Ok(client) => client,
            Err(e) => return ProbeResult::failed(ProbeFailure::Transport(e.to_string())),
        };

        let responses = join_all(
            self.providers
                .iter()
                .map(|provider| Self::fetch(&client, provider)),
        )
        .await;

        let mut payload = Map::new();
        let mut fastest: Option<u64> = None;
        let mut first_error: Option<ProbeFailure> = None;

        for (provider, response) in self.providers.iter().zip(responses) {
            match response {
                Ok((document, latency_ms)) => {
                    payload.insert(provider.name.clone(), document);
                    fastest = Some(fastest.map_or(latency_ms, |f| f.min(latency_ms)));
                }
                Err(e) => {
                    trace!("Provider {} failed through {}: {}", provider.name, proxy, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match fastest {
            Some(latency_ms) => ProbeResult::succeeded(Value::Object(payload), latency_ms),
            None => ProbeResult::failed(
                first_error
                    .unwrap_or_else(|| ProbeFailure::Transport("no providers configured".to_string())),
            ),
        }
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> ProbeFailure {
    if e.is_timeout() {
        ProbeFailure::Timeout
    } else if let Some(status) = e.status() {
        ProbeFailure::Status(status.as_u16())
    } else {
        ProbeFailure::Transport(e.to_string())
    }
}
