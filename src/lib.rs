//! Proxy Verify - proxy endpoint verification and rescan scheduling
//!
//! Stands up a local proxy core per candidate link, decides whether the
//! endpoint works from a short probe sequence, enriches working endpoints
//! with geolocation and throughput, and keeps an append-only history that
//! drives how often each endpoint is checked again.

pub mod error;
pub mod proxy;

pub use error::*;
pub use proxy::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
