//! Throughput capability: download/upload rate through a local proxy

use crate::error::ThroughputError;
use crate::proxy::models::ThroughputResult;
use async_trait::async_trait;
use reqwest::{Client, Proxy as ReqwestProxy};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Default download URL (size is part of the query)
const DEFAULT_DOWNLOAD_URL: &str = "https://speed.cloudflare.com/__down?bytes=10000000";

/// Default upload URL
const DEFAULT_UPLOAD_URL: &str = "https://speed.cloudflare.com/__up";

/// Default upload payload size in bytes
const DEFAULT_UPLOAD_BYTES: usize = 2_000_000;

/// Measures throughput through a local proxy address
#[async_trait]
pub trait ThroughputMeter: Send + Sync {
    async fn measure(
        &self,
        proxy: SocketAddr,
        timeout: Duration,
    ) -> Result<ThroughputResult, ThroughputError>;
}

/// Configuration for the HTTP throughput meter
#[derive(Debug, Clone)]
pub struct ThroughputConfig {
    pub download_url: String,
    pub upload_url: String,
    pub upload_bytes: usize,
}

impl Default for ThroughputConfig {
    fn default() -> Self {
        Self {
            download_url: DEFAULT_DOWNLOAD_URL.to_string(),
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
            upload_bytes: DEFAULT_UPLOAD_BYTES,
        }
    }
}

impl ThroughputConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_download_url(mut self, url: String) -> Self {
        self.download_url = url;
        self
    }

    pub fn with_upload_url(mut self, url: String) -> Self {
        self.upload_url = url;
        self
    }

    pub fn with_upload_bytes(mut self, bytes: usize) -> Self {
        self.upload_bytes = bytes;
        self
    }
}

/// Throughput meter using plain HTTP transfers
#[derive(Debug, Clone, Default)]
pub struct ReqwestThroughputMeter {
    config: ThroughputConfig,
}

impl ReqwestThroughputMeter {
    pub fn new(config: ThroughputConfig) -> Self {
        Self { config }
    }

    async fn download(&self, client: &Client) -> Result<(f64, u64), ThroughputError> {
        let start = Instant::now();
        let mut response = client
            .get(&self.config.download_url)
            .send()
            .await
            .map_err(classify)?;
        let ping_ms = start.elapsed().as_millis() as u64;

        if !response.status().is_success() {
            return Err(ThroughputError::Status(response.status().as_u16()));
        }

        let transfer_start = Instant::now();
        let mut bytes: u64 = 0;
        while let Some(chunk) = response.chunk().await.map_err(classify)? {
            bytes += chunk.len() as u64;
        }

        Ok((mbps(bytes, transfer_start.elapsed()), ping_ms))
    }

    async fn upload(&self, client: &Client) -> Result<f64, ThroughputError> {
        let body = vec![0u8; self.config.upload_bytes];
        let start = Instant::now();
        let response = client
            .post(&self.config.upload_url)
            .body(body)
            .send()
            .await
            .map_err(classify)?;

        if !response.status().is_success() {
            return Err(ThroughputError::Status(response.status().as_u16()));
        }

        Ok(mbps(self.config.upload_bytes as u64, start.elapsed()))
    }
}

#[async_trait]
impl ThroughputMeter for ReqwestThroughputMeter {
    async fn measure(
        &self,
        proxy: SocketAddr,
        timeout: Duration,
    ) -> Result<ThroughputResult, ThroughputError> {
        let client = Client::builder()
            .proxy(
                ReqwestProxy::all(format!("socks5h://{}", proxy))
                    .map_err(|e| ThroughputError::Transport(e.to_string()))?,
            )
            .timeout(timeout)
            .build()
            .map_err(|e| ThroughputError::Transport(e.to_string()))?;

        let measurement = async {
            let (download_mbps, ping_ms) = self.download(&client).await?;
            let upload_mbps = self.upload(&client).await?;
            Ok::<_, ThroughputError>(ThroughputResult {
                download_mbps,
                upload_mbps,
                ping_ms: Some(ping_ms),
            })
        };

        tokio::time::timeout(timeout, measurement)
            .await
            .map_err(|_| ThroughputError::Timeout)?
    }
}

/// Megabits per second, rounded to two decimals
pub fn mbps(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64().max(0.001);
    let value = (bytes as f64 * 8.0) / secs / 1_000_000.0;
    (value * 100.0).round() / 100.0
}

fn classify(e: reqwest::Error) -> ThroughputError {
    if e.is_timeout() {
        ThroughputError::Timeout
    } else if let Some(status) = e.status() {
        ThroughputError::Status(status.as_u16())
    } else {
        ThroughputError::Transport(e.to_string())
    }
}
