//! Per-run report

use crate::proxy::models::CheckEntry;
use crate::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Outcome for one endpoint tested in this run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub identity: String,
    pub display_name: String,
    /// Local port the endpoint was tested on, absent if none was assigned
    pub port: Option<u16>,
    pub entry: CheckEntry,
}

/// Summary of one run, one outcome per tested endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Candidates known to the run, tested or not
    pub candidates: usize,
    pub total: usize,
    pub working: usize,
    pub failed: usize,
    pub outcomes: Vec<RunOutcome>,
}

impl RunReport {
    pub fn new(
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        candidates: usize,
        outcomes: Vec<RunOutcome>,
    ) -> Self {
        let working = outcomes.iter().filter(|o| o.entry.success).count();
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at,
            candidates,
            total: outcomes.len(),
            working,
            failed: outcomes.len() - working,
            outcomes,
        }
    }

    /// Endpoints not dispatched because they were not due
    pub fn skipped(&self) -> usize {
        self.candidates.saturating_sub(self.total)
    }

    /// `report-<timestamp>.json` with millisecond precision, safe on every
    /// filesystem
    pub fn file_name(&self) -> String {
        format!(
            "report-{}.json",
            self.started_at
                .to_rfc3339_opts(SecondsFormat::Millis, true)
                .replace(':', "-")
        )
    }

    /// Write the report as pretty JSON into `dir`, returning the file path
    pub fn write_to(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        info!("Wrote report for run {} to {:?}", self.run_id, path);
        Ok(path)
    }
}
