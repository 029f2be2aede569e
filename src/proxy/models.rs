//! Proxy data models

use crate::error::ProbeFailure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A candidate endpoint read from a link list or subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// The link exactly as it appeared in the source
    pub full_link: String,
    /// The link with its display fragment stripped
    pub identity: String,
    /// The display fragment, empty when the link carries none
    pub display_name: String,
}

impl Candidate {
    /// Build a candidate from a full link, splitting off the `#fragment`
    pub fn from_link(link: &str) -> Self {
        let link = link.trim();
        let (identity, display_name) = match link.split_once('#') {
            Some((identity, fragment)) => (identity, fragment),
            None => (link, ""),
        };

        Self {
            full_link: link.to_string(),
            identity: identity.to_string(),
            display_name: display_name.to_string(),
        }
    }

    /// URL scheme of the link, lowercased
    pub fn scheme(&self) -> Option<String> {
        self.identity
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.display_name.is_empty() {
            write!(f, "{}", self.identity)
        } else {
            write!(f, "{} ({})", self.display_name, self.identity)
        }
    }
}

/// Outcome of one probe attempt through a local proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub success: bool,
    pub payload: Option<Value>,
    pub latency_ms: Option<u64>,
    #[serde(skip)]
    pub error: Option<ProbeFailure>,
}

impl ProbeResult {
    pub fn succeeded(payload: Value, latency_ms: u64) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            latency_ms: Some(latency_ms),
            error: None,
        }
    }

    pub fn failed(error: ProbeFailure) -> Self {
        Self {
            success: false,
            payload: None,
            latency_ms: None,
            error: Some(error),
        }
    }

    /// Human-readable failure reason, if any
    pub fn reason(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }
}

/// Canonical exit geolocation. Empty strings mean "unresolved".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GeoRecord {
    pub country: String,
    pub city: String,
    pub asn_number: String,
    pub asn_org_name: String,
}

impl GeoRecord {
    pub fn is_empty(&self) -> bool {
        self.country.is_empty()
            && self.city.is_empty()
            && self.asn_number.is_empty()
            && self.asn_org_name.is_empty()
    }

    /// Get a short display string for the location
    pub fn short_display(&self) -> String {
        match (self.country.as_str(), self.city.as_str()) {
            ("", "") => String::from("Unknown"),
            (cc, "") => cc.to_string(),
            ("", city) => city.to_string(),
            (cc, city) => format!("{}, {}", city, cc),
        }
    }
}

/// Throughput reading taken through a working endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThroughputResult {
    pub download_mbps: f64,
    pub upload_mbps: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ping_ms: Option<u64>,
}

/// One historical verification record. Never rewritten once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckEntry {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub latency_ms: Option<u64>,
    #[serde(default)]
    pub geo: GeoRecord,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throughput: Option<ThroughputResult>,
    #[serde(default)]
    pub insecure_mode_used: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_provider_payload: Option<Value>,
}

impl CheckEntry {
    /// A failed check carrying only a reason
    pub fn failure(timestamp: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            timestamp,
            success: false,
            latency_ms: None,
            geo: GeoRecord::default(),
            ip_address: String::new(),
            throughput: None,
            insecure_mode_used: false,
            error: Some(error.into()),
            raw_provider_payload: None,
        }
    }

    /// Append a note to the error text without discarding what is there
    pub fn push_error(&mut self, note: impl AsRef<str>) {
        let note = note.as_ref();
        self.error = Some(match self.error.take() {
            Some(existing) if !existing.is_empty() => format!("{}; {}", existing, note),
            _ => note.to_string(),
        });
    }
}

/// Status derived from the most recent check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyStatus {
    #[default]
    Pending,
    Working,
    Error,
}

impl fmt::Display for ProxyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyStatus::Pending => write!(f, "pending"),
            ProxyStatus::Working => write!(f, "working"),
            ProxyStatus::Error => write!(f, "error"),
        }
    }
}

/// Registry entry: one identity and its append-only history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyEntry {
    pub identity: String,
    pub display_name: String,
    pub full_link: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    checks: Vec<CheckEntry>,
    #[serde(default)]
    status: ProxyStatus,
}

impl ProxyEntry {
    pub fn new(candidate: &Candidate, created_at: DateTime<Utc>) -> Self {
        Self {
            identity: candidate.identity.clone(),
            display_name: candidate.display_name.clone(),
            full_link: candidate.full_link.clone(),
            created_at,
            checks: Vec::new(),
            status: ProxyStatus::Pending,
        }
    }

    pub fn checks(&self) -> &[CheckEntry] {
        &self.checks
    }

    pub fn status(&self) -> ProxyStatus {
        self.status
    }

    pub fn last_check(&self) -> Option<&CheckEntry> {
        self.checks.last()
    }

    /// Number of consecutive failed checks, counted back from the latest
    pub fn failure_streak(&self) -> u32 {
        self.checks
            .iter()
            .rev()
            .take_while(|check| !check.success)
            .count() as u32
    }

    /// The most recently stored raw provider payload
    pub fn latest_raw_payload(&self) -> Option<&Value> {
        self.checks
            .iter()
            .rev()
            .find_map(|check| check.raw_provider_payload.as_ref())
    }

    /// Append a check and recompute the derived status.
    ///
    /// The raw payload is dropped when identical to the latest stored one,
    /// and the timestamp is clamped so history stays chronological.
    pub fn append(&mut self, mut check: CheckEntry) {
        if check.raw_provider_payload.is_some()
            && check.raw_provider_payload.as_ref() == self.latest_raw_payload()
        {
            check.raw_provider_payload = None;
        }

        if let Some(last) = self.checks.last() {
            if check.timestamp < last.timestamp {
                check.timestamp = last.timestamp;
            }
        }

        self.checks.push(check);
        self.refresh_status();
    }

    /// Refresh display fields when a later occurrence carries new ones
    pub fn refresh_display(&mut self, candidate: &Candidate) -> bool {
        if candidate.display_name == self.display_name && candidate.full_link == self.full_link {
            return false;
        }
        self.display_name = candidate.display_name.clone();
        self.full_link = candidate.full_link.clone();
        true
    }

    pub(crate) fn refresh_status(&mut self) {
        self.status = match self.checks.last() {
            None => ProxyStatus::Pending,
            Some(check) if check.success => ProxyStatus::Working,
            Some(_) => ProxyStatus::Error,
        };
    }
}
