//! Run context, audit rows and the run summary (stable v1)
//!
//! The audit row layout mirrors the job-run table and is STABLE.
//! Breaking changes require a new summary version.

use crate::config::SyncConfig;
use crate::metadata::MetadataRecord;
use crate::outcome::{OutcomeStatus, ReconciliationAction, RunStats};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Start instant of the most recent run in this process, in epoch milliseconds
static LAST_RUN_START_MS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Summary schema version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportVersion {
    /// Major version (breaking changes)
    pub major: u32,

    /// Minor version (backward-compatible additions)
    pub minor: u32,
}

impl ReportVersion {
    /// Current summary schema version
    pub const CURRENT: ReportVersion = ReportVersion { major: 1, minor: 0 };
}

impl std::fmt::Display for ReportVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// ISO 8601 timestamp with second precision, as written to the audit table
pub fn iso_seconds(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Read-only facts about one run, fixed at start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    /// Unique, timestamp-derived run identifier
    pub run_id: String,

    pub started_at: DateTime<Utc>,

    /// Pause after each successful mutation
    pub sleep_interval: Duration,

    /// Maximum number of tables processed at once
    pub worker_count: usize,
}

impl RunContext {
    /// Start a run now
    ///
    /// Runs started in the same millisecond by one process are spread one
    /// millisecond apart so their ids never collide.
    pub fn new(config: &SyncConfig) -> Self {
        Self::started_at(config, unique_start(Utc::now()))
    }

    /// Start a run at a fixed instant
    pub fn started_at(config: &SyncConfig, started_at: DateTime<Utc>) -> Self {
        let stamp = started_at.to_rfc3339_opts(SecondsFormat::Millis, false);
        Self {
            run_id: format!("job_{}", stamp.replace(':', "-")),
            started_at,
            sleep_interval: config.sleep_interval(),
            worker_count: config.worker_count,
        }
    }
}

fn unique_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let wanted = now.timestamp_millis();
    let mut last = LAST_RUN_START_MS.load(Ordering::SeqCst);
    loop {
        let next = wanted.max(last.saturating_add(1));
        match LAST_RUN_START_MS.compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return Utc.timestamp_millis_opt(next).single().unwrap_or(now),
            Err(actual) => last = actual,
        }
    }
}

/// One row of the job-run audit table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogRow {
    pub job_run_id: String,

    /// ISO 8601, second precision
    pub timestamp: String,

    pub status: OutcomeStatus,

    pub table_name: String,

    pub column_name: String,

    /// Desired description the outcome refers to
    #[serde(rename = "column_metadata")]
    pub description: String,

    pub target_dataset: String,
}

impl AuditLogRow {
    /// Build the audit row for a record's outcome
    pub fn new(
        run_id: &str,
        at: DateTime<Utc>,
        record: &MetadataRecord,
        action: &ReconciliationAction,
    ) -> Self {
        Self {
            job_run_id: run_id.to_string(),
            timestamp: iso_seconds(at),
            status: action.status(),
            table_name: record.table.clone(),
            column_name: record.column.clone(),
            description: record.description.clone(),
            target_dataset: record.dataset.clone(),
        }
    }
}

/// Result of writing the audit rows to the sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum AuditWrite {
    /// All rows were inserted
    Written(usize),

    /// No rows to insert
    Empty,

    /// The batch insert failed; counters are unaffected
    Failed(String),
}

/// Final summary of a run (summary.json v1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Schema version
    pub version: ReportVersion,

    pub run_id: String,

    /// Start timestamp (ISO 8601)
    pub started_at: String,

    /// Wall-clock duration in seconds
    pub duration_secs: f64,

    /// Outcome counters
    pub stats: RunStats,

    /// Records read from the catalog
    pub records_read: usize,

    /// Records superseded by a later row for the same column
    pub duplicates: usize,

    /// Records belonging to tables never dispatched (interrupted runs)
    pub not_dispatched: usize,

    /// Whether the operator interrupted the run
    pub interrupted: bool,

    pub audit: AuditWrite,
}

impl RunSummary {
    /// Records that were planned for reconciliation
    pub fn planned_records(&self) -> usize {
        self.records_read - self.duplicates
    }

    /// Every planned record either received exactly one outcome or was never dispatched
    pub fn is_conserved(&self) -> bool {
        self.stats.total() + self.not_dispatched == self.planned_records()
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Save to file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let json = self
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }
}
