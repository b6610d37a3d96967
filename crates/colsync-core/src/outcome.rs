//! Per-column reconciliation outcomes and run counters

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a metadata record could not be matched to a live column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedReason {
    TableNotFound,
    ColumnNotFound,
}

impl fmt::Display for UnmatchedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TableNotFound => write!(f, "table not found"),
            Self::ColumnNotFound => write!(f, "column not found"),
        }
    }
}

/// Outcome of reconciling one metadata record
///
/// Exactly one action is produced for every planned record in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ReconciliationAction {
    /// Description was altered in the warehouse
    Updated,

    /// Live description already matched
    Skipped,

    /// Table or column absent
    Unmatched(UnmatchedReason),

    /// Schema read or mutation failed; carries the cause
    Error(String),
}

impl ReconciliationAction {
    /// Status label, as persisted in the audit table
    pub fn status(&self) -> OutcomeStatus {
        match self {
            Self::Updated => OutcomeStatus::Updated,
            Self::Skipped => OutcomeStatus::Skipped,
            Self::Unmatched(_) => OutcomeStatus::Unmatched,
            Self::Error(_) => OutcomeStatus::Error,
        }
    }
}

/// Coarse outcome kind, one counter per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Updated,
    Skipped,
    Unmatched,
    Error,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Updated => "updated",
            Self::Skipped => "skipped",
            Self::Unmatched => "unmatched",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome counters for a run or a single table group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub updated: usize,
    pub skipped: usize,
    pub unmatched: usize,
    pub error: usize,
}

impl RunStats {
    /// Count one outcome
    pub fn record(&mut self, action: &ReconciliationAction) {
        match action.status() {
            OutcomeStatus::Updated => self.updated += 1,
            OutcomeStatus::Skipped => self.skipped += 1,
            OutcomeStatus::Unmatched => self.unmatched += 1,
            OutcomeStatus::Error => self.error += 1,
        }
    }

    /// Add another set of counters into this one
    pub fn merge(&mut self, other: &RunStats) {
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.unmatched += other.unmatched;
        self.error += other.error;
    }

    /// Sum of all outcome counters
    pub fn total(&self) -> usize {
        self.updated + self.skipped + self.unmatched + self.error
    }

    /// Counters as `(status, count)` pairs in display order
    pub fn entries(&self) -> [(OutcomeStatus, usize); 4] {
        [
            (OutcomeStatus::Updated, self.updated),
            (OutcomeStatus::Skipped, self.skipped),
            (OutcomeStatus::Unmatched, self.unmatched),
            (OutcomeStatus::Error, self.error),
        ]
    }
}
