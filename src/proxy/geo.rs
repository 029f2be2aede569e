//! Geolocation: provider normalization, consensus and MMDB lookups
//!
//! Every probe payload carries one document per geo/IP provider. The
//! providers routinely disagree, so each field of the final record is
//! resolved on its own: a strict majority of at least two providers wins,
//! otherwise the first provider in priority order with a value wins.

use crate::proxy::models::GeoRecord;
use crate::Result;
use maxminddb::{geoip2, Reader};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Provider name used for local MMDB lookups
pub const MMDB_PROVIDER: &str = "mmdb";

/// Default provider priority for fallback resolution
pub const DEFAULT_PRIORITY: &[&str] = &["ipinfo", "ipapi", "ipsb", "ipwhois", MMDB_PROVIDER];

/// Matches "AS13335 Cloudflare, Inc." style organization strings
static AS_PREFIX_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*AS(\d+)\s*(.*)$").expect("Invalid AS regex"));

/// What one provider said about the exit address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderFields {
    pub ip: String,
    pub country: String,
    pub city: String,
    pub asn_number: String,
    pub asn_org_name: String,
}

impl ProviderFields {
    pub fn is_empty(&self) -> bool {
        self.ip.is_empty()
            && self.country.is_empty()
            && self.city.is_empty()
            && self.asn_number.is_empty()
            && self.asn_org_name.is_empty()
    }

    /// Normalize one provider document by well-known field aliases
    pub fn from_document(doc: &Value) -> Self {
        let mut fields = Self {
            ip: first_text(doc, &["ip", "query", "ip_addr", "address"]),
            country: first_text(doc, &["countryCode", "country_code", "country"]).to_uppercase(),
            city: first_text(doc, &["city", "city_name"]),
            asn_number: first_text(doc, &["asn"]),
            asn_org_name: first_text(
                doc,
                &["asn_organization", "asname", "as_name", "organization", "isp"],
            ),
        };

        if let Some(connection) = doc.get("connection") {
            if fields.asn_number.is_empty() {
                fields.asn_number = first_text(connection, &["asn"]);
            }
            if fields.asn_org_name.is_empty() {
                fields.asn_org_name = first_text(connection, &["org", "isp"]);
            }
        }

        // "as"/"org" may carry "AS123 Name"
        for key in ["as", "org"] {
            let raw = first_text(doc, &[key]);
            if let Some(caps) = AS_PREFIX_REGEX.captures(&raw) {
                if fields.asn_number.is_empty() {
                    fields.asn_number = caps[1].to_string();
                }
                if fields.asn_org_name.is_empty() && !caps[2].trim().is_empty() {
                    fields.asn_org_name = caps[2].trim().to_string();
                }
            } else if key == "org" && fields.asn_org_name.is_empty() {
                fields.asn_org_name = raw;
            }
        }

        fields.asn_number = fields
            .asn_number
            .trim_start_matches("AS")
            .trim_start_matches("as")
            .to_string();
        fields
    }
}

fn first_text(doc: &Value, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|key| match doc.get(*key) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_default()
}

/// Split a probe payload into per-provider fields.
///
/// The payload is an object keyed by provider name. A flat document with
/// recognizable fields at the top level is treated as a single provider
/// named `direct`.
pub fn extract_providers(payload: &Value) -> BTreeMap<String, ProviderFields> {
    let mut providers = BTreeMap::new();
    let Some(object) = payload.as_object() else {
        return providers;
    };

    for (name, doc) in object {
        if doc.is_object() {
            let fields = ProviderFields::from_document(doc);
            if !fields.is_empty() {
                providers.insert(name.clone(), fields);
            }
        }
    }

    if providers.is_empty() {
        let fields = ProviderFields::from_document(payload);
        if !fields.is_empty() {
            providers.insert("direct".to_string(), fields);
        }
    }

    providers
}

/// Resolve one field across providers.
///
/// A non-empty value held by at least two providers and strictly more than
/// any other value wins; otherwise the first provider in `priority` with a
/// non-empty value wins.
pub fn resolve_field<'a, F>(
    providers: &'a BTreeMap<String, ProviderFields>,
    priority: &[String],
    field: F,
) -> String
where
    F: Fn(&'a ProviderFields) -> &'a str,
{
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for fields in providers.values() {
        let value = field(fields);
        if !value.is_empty() {
            *counts.entry(value).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    match ranked.as_slice() {
        [(value, top), rest @ ..] if *top >= 2 && rest.first().map_or(true, |(_, n)| n < top) => {
            return value.to_string();
        }
        _ => {}
    }

    priority
        .iter()
        .filter_map(|name| providers.get(name))
        .chain(
            providers
                .iter()
                .filter(|(name, _)| !priority.contains(*name))
                .map(|(_, fields)| fields),
        )
        .map(|fields| field(fields))
        .find(|value| !value.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// Configuration for geo resolution
#[derive(Debug, Clone)]
pub struct GeoConfig {
    /// Provider names in fallback order
    pub priority: Vec<String>,
    /// Path to MMDB file for local lookups (optional)
    pub mmdb_path: Option<String>,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY.iter().map(|s| s.to_string()).collect(),
            mmdb_path: None,
        }
    }
}

impl GeoConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: Vec<String>) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_mmdb_path(mut self, path: String) -> Self {
        self.mmdb_path = Some(path);
        self
    }
}

/// Resolved exit location and address
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GeoResolution {
    pub geo: GeoRecord,
    pub ip_address: String,
}

/// Per-field consensus across providers, optionally backed by MMDB
#[derive(Clone)]
pub struct GeoResolver {
    priority: Vec<String>,
    locator: Option<GeoLocator>,
}

impl GeoResolver {
    pub fn new(priority: Vec<String>) -> Self {
        Self {
            priority,
            locator: None,
        }
    }

    /// Build a resolver from configuration, skipping an unreadable MMDB
    pub fn with_config(config: &GeoConfig) -> Self {
        let locator = config.mmdb_path.as_ref().and_then(|path| {
            GeoLocator::from_path(path)
                .map_err(|e| debug!("MMDB {} unavailable: {}", path, e))
                .ok()
        });

        Self {
            priority: config.priority.clone(),
            locator,
        }
    }

    pub fn with_locator(mut self, locator: GeoLocator) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn priority(&self) -> &[String] {
        &self.priority
    }

    /// Resolve the canonical record from per-provider fields
    pub fn resolve(&self, providers: &BTreeMap<String, ProviderFields>) -> GeoRecord {
        GeoRecord {
            country: resolve_field(providers, &self.priority, |f| f.country.as_str()),
            city: resolve_field(providers, &self.priority, |f| f.city.as_str()),
            asn_number: resolve_field(providers, &self.priority, |f| f.asn_number.as_str()),
            asn_org_name: resolve_field(providers, &self.priority, |f| f.asn_org_name.as_str()),
        }
    }

    /// Resolve geo and exit IP from a probe payload
    pub fn resolve_payload(&self, payload: &Value) -> GeoResolution {
        let mut providers = extract_providers(payload);
        let ip_address = resolve_field(&providers, &self.priority, |f| f.ip.as_str());

        if let Some(ref locator) = self.locator {
            match locator.lookup(&ip_address) {
                Ok(location) if !location.is_empty() => {
                    providers.insert(MMDB_PROVIDER.to_string(), location.into());
                }
                Ok(_) => {}
                Err(e) => debug!("MMDB lookup for {:?} failed: {}", ip_address, e),
            }
        }

        GeoResolution {
            geo: self.resolve(&providers),
            ip_address,
        }
    }
}

impl Default for GeoResolver {
    fn default() -> Self {
        Self::with_config(&GeoConfig::default())
    }
}

/// Geographic location information for an IP address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GeoLocation {
    /// ISO 3166-1 alpha-2 country code (e.g., "US", "CN")
    pub country_code: Option<String>,
    /// City name in English
    pub city_name: Option<String>,
}

impl GeoLocation {
    pub fn is_empty(&self) -> bool {
        self.country_code.is_none() && self.city_name.is_none()
    }
}

impl From<GeoLocation> for ProviderFields {
    fn from(location: GeoLocation) -> Self {
        Self {
            country: location.country_code.unwrap_or_default(),
            city: location.city_name.unwrap_or_default(),
            ..Default::default()
        }
    }
}

/// GeoLocator for looking up IP addresses in MMDB databases
pub struct GeoLocator {
    reader: Arc<Reader<Vec<u8>>>,
}

impl GeoLocator {
    /// Create a new GeoLocator from an MMDB file path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = Reader::open_readfile(path)?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    /// Look up the geolocation for an IP address string
    pub fn lookup(&self, ip_str: &str) -> Result<GeoLocation> {
        let ip: IpAddr = ip_str.parse()?;
        self.lookup_ip(ip)
    }

    /// Look up the geolocation for an IpAddr
    pub fn lookup_ip(&self, ip: IpAddr) -> Result<GeoLocation> {
        let lookup_result = self.reader.lookup(ip)?;
        let city: Option<geoip2::City> = lookup_result.decode()?;

        let Some(city) = city else {
            return Ok(GeoLocation::default());
        };

        Ok(GeoLocation {
            country_code: city.country.iso_code.map(String::from),
            city_name: city.city.names.english.map(String::from),
        })
    }
}

impl Clone for GeoLocator {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
        }
    }
}
