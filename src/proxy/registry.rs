//! Persisted registry of endpoints and their verification history

use crate::error::PersistenceError;
use crate::proxy::models::{Candidate, CheckEntry, ProxyEntry};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Identity-keyed registry backed by a JSON file
#[derive(Debug, Clone, Default)]
pub struct ProxyRegistry {
    path: Option<PathBuf>,
    entries: BTreeMap<String, ProxyEntry>,
}

impl ProxyRegistry {
    /// An empty registry with no backing file
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the registry at `path`.
    ///
    /// A missing or unreadable store yields an empty registry bound to the
    /// same path, so the run continues and the next save recreates it.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match Self::read(&path) {
            Ok(entries) => {
                info!("Loaded {} registry entries from {:?}", entries.len(), path);
                entries
            }
            Err(PersistenceError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No registry at {:?}, starting empty", path);
                BTreeMap::new()
            }
            Err(e) => {
                warn!("Registry {:?} unusable, starting empty: {}", path, e);
                BTreeMap::new()
            }
        };

        Self {
            path: Some(path),
            entries,
        }
    }

    fn read(path: &Path) -> Result<BTreeMap<String, ProxyEntry>, PersistenceError> {
        let content = std::fs::read_to_string(path)?;
        let mut entries: BTreeMap<String, ProxyEntry> = serde_json::from_str(&content)?;
        for (identity, entry) in entries.iter_mut() {
            // the map key is authoritative
            if &entry.identity != identity {
                entry.identity = identity.clone();
            }
            entry.refresh_status();
        }
        Ok(entries)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Create the entry if absent, else refresh its display fields
    pub fn upsert(&mut self, candidate: &Candidate, now: DateTime<Utc>) -> &ProxyEntry {
        let entry = self
            .entries
            .entry(candidate.identity.clone())
            .and_modify(|entry| {
                if entry.refresh_display(candidate) {
                    debug!("Updated display name of {}", entry.identity);
                }
            })
            .or_insert_with(|| {
                debug!("New registry entry {}", candidate.identity);
                ProxyEntry::new(candidate, now)
            });
        entry
    }

    /// Append a check to an existing identity. Returns false when unknown.
    pub fn append(&mut self, identity: &str, check: CheckEntry) -> bool {
        match self.entries.get_mut(identity) {
            Some(entry) => {
                entry.append(check);
                true
            }
            None => {
                warn!("Dropping check for unknown identity {}", identity);
                false
            }
        }
    }

    pub fn get(&self, identity: &str) -> Option<&ProxyEntry> {
        self.entries.get(identity)
    }

    /// All entries, ordered by identity
    pub fn all(&self) -> impl Iterator<Item = &ProxyEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the registry to its backing file, replacing it atomically
    pub fn save(&self) -> Result<(), PersistenceError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&self.entries)?)?;
        std::fs::rename(&tmp, path)?;

        info!("Saved {} registry entries to {:?}", self.entries.len(), path);
        Ok(())
    }
}
