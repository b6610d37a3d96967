//! colsync core
//!
//! Domain model for column-description reconciliation. The audit row and
//! summary layouts are part of the public contract - never rename fields.

pub mod config;
pub mod metadata;
pub mod outcome;
pub mod report;
pub mod schema;

pub use config::{ConfigError, PartialConfig, SyncConfig, MAX_WORKER_COUNT};
pub use metadata::{MetadataRecord, TableGroupKey};
pub use outcome::{OutcomeStatus, ReconciliationAction, RunStats, UnmatchedReason};
pub use report::{iso_seconds, AuditLogRow, AuditWrite, ReportVersion, RunContext, RunSummary};
pub use schema::{Column, ColumnMode, Schema, SchemaSnapshot};
