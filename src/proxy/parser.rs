//! Link list parser producing deduplicated candidates

use crate::proxy::models::Candidate;
use crate::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

static SCHEME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*://\S+$").expect("Invalid scheme regex"));

static AUTH_AT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^:@\s]+):([^@\s]+)@([^:@\s]+):(\d+)$").expect("Invalid auth regex"));

/// Parser for candidate link lists
pub struct LinkParser;

impl LinkParser {
    /// Parse a single line into a candidate
    ///
    /// Supports formats:
    /// - scheme://...#display-name
    /// - HOST:PORT
    /// - HOST:PORT:USER:PASS
    /// - USER:PASS@HOST:PORT
    ///
    /// Bare host forms are promoted to links using `default_scheme`.
    pub fn parse_line(line: &str, default_scheme: &str) -> Option<Candidate> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
            return None;
        }

        if SCHEME_REGEX.is_match(line) {
            return Some(Candidate::from_link(line));
        }

        Self::promote_bare(line, default_scheme).map(|link| Candidate::from_link(&link))
    }

    fn promote_bare(line: &str, default_scheme: &str) -> Option<String> {
        if let Some(caps) = AUTH_AT_REGEX.captures(line) {
            let port: u16 = caps[4].parse().ok()?;
            return Some(format!(
                "{}://{}:{}@{}:{}",
                default_scheme, &caps[1], &caps[2], &caps[3], port
            ));
        }

        let parts: Vec<&str> = line.split(':').collect();
        match parts.as_slice() {
            [host, port] if !host.is_empty() => {
                let port: u16 = port.parse().ok()?;
                Some(format!("{}://{}:{}", default_scheme, host, port))
            }
            [host, port, user, pass] if !host.is_empty() => {
                let port: u16 = port.parse().ok()?;
                Some(format!(
                    "{}://{}:{}@{}:{}",
                    default_scheme, user, pass, host, port
                ))
            }
            _ => None,
        }
    }

    /// Parse candidates from a string (multiple lines)
    pub fn parse_string(content: &str, default_scheme: &str) -> Vec<Candidate> {
        Self::dedup(
            content
                .lines()
                .filter_map(|line| Self::parse_line(line, default_scheme)),
        )
    }

    /// Parse candidates from a file
    pub fn parse_file<P: AsRef<Path>>(path: P, default_scheme: &str) -> Result<Vec<Candidate>> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse_string(&content, default_scheme))
    }

    /// Collapse duplicates by identity.
    ///
    /// The first occurrence keeps its position; a later occurrence replaces
    /// the display name and full link.
    pub fn dedup<I>(candidates: I) -> Vec<Candidate>
    where
        I: IntoIterator<Item = Candidate>,
    {
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut unique: Vec<Candidate> = Vec::new();

        for candidate in candidates {
            match positions.get(&candidate.identity) {
                Some(&index) => unique[index] = candidate,
                None => {
                    positions.insert(candidate.identity.clone(), unique.len());
                    unique.push(candidate);
                }
            }
        }

        unique
    }
}
