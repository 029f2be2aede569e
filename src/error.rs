//! Error taxonomy for endpoint verification
//!
//! Each concern gets its own error type so callers can decide what is
//! terminal for an endpoint and what is merely recorded.

use std::time::Duration;
use thiserror::Error;

/// A link could not be turned into an outbound descriptor.
///
/// Terminal for the endpoint: no retry, no insecure fallback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("unsupported link scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid link: {0}")]
    InvalidLink(String),

    #[error("missing {field} in link")]
    MissingField { field: &'static str },
}

/// Failures raised while bringing up the local proxy process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("process not ready after {0:?}")]
    StartupTimeout(Duration),

    #[error("process reported a fatal error: {0}")]
    FatalProcess(String),

    #[error("failed to spawn process: {0}")]
    Spawn(String),

    #[error("local port {0} is already in use")]
    PortInUse(u16),
}

/// Reason a single probe attempt failed.
///
/// Probe failures are expected and counted, they are data rather than
/// exceptional conditions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    #[error("probe timed out")]
    Timeout,

    #[error("non-success status: {0}")]
    Status(u16),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Throughput measurement failure. Never downgrades a working verdict.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ThroughputError {
    #[error("throughput measurement timed out")]
    Timeout,

    #[error("throughput endpoint returned status {0}")]
    Status(u16),

    #[error("throughput transport error: {0}")]
    Transport(String),
}

/// Registry load/save failure. Degrades to in-memory operation.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("registry is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
