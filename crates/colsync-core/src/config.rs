//! Run configuration (colsync.toml, environment, CLI flags)
//!
//! Configuration is resolved once at startup into an immutable [`SyncConfig`]
//! that is passed by reference to every component.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default pause after each successful mutation
pub const DEFAULT_SLEEP_INTERVAL_MS: u64 = 1000;

/// Default number of tables reconciled concurrently
pub const DEFAULT_WORKER_COUNT: usize = 5;

/// Upper bound on concurrently reconciled tables
pub const MAX_WORKER_COUNT: usize = 64;

/// Fully resolved configuration for one reconciliation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// GCP project holding the target tables
    pub project_id: String,

    /// Governance metadata table (`dataset.table` or `project.dataset.table`)
    pub metadata_table_ref: String,

    /// Job-run audit table (`dataset.table` or `project.dataset.table`)
    pub audit_table_ref: String,

    /// Pause after each successful mutation, in milliseconds
    pub sleep_interval_ms: u64,

    /// Maximum number of tables processed at once
    pub worker_count: usize,

    /// Also append progress lines to a local log file
    pub enable_local_log: bool,

    /// Service account key file; Application Default Credentials when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_path: Option<PathBuf>,
}

impl SyncConfig {
    /// Create a config with default tuning values
    pub fn new(
        project_id: impl Into<String>,
        metadata_table_ref: impl Into<String>,
        audit_table_ref: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            metadata_table_ref: metadata_table_ref.into(),
            audit_table_ref: audit_table_ref.into(),
            sleep_interval_ms: DEFAULT_SLEEP_INTERVAL_MS,
            worker_count: DEFAULT_WORKER_COUNT,
            enable_local_log: false,
            credentials_path: None,
        }
    }

    pub fn with_sleep_interval_ms(mut self, sleep_interval_ms: u64) -> Self {
        self.sleep_interval_ms = sleep_interval_ms;
        self
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_local_log(mut self, enable_local_log: bool) -> Self {
        self.enable_local_log = enable_local_log;
        self
    }

    /// Pause after each successful mutation
    pub fn sleep_interval(&self) -> Duration {
        Duration::from_millis(self.sleep_interval_ms)
    }

    /// Check required values and table reference shapes
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project_id.trim().is_empty() {
            return Err(ConfigError::MissingField("project_id"));
        }
        validate_table_ref("metadata_table_ref", &self.metadata_table_ref)?;
        validate_table_ref("audit_table_ref", &self.audit_table_ref)?;

        if !(1..=MAX_WORKER_COUNT).contains(&self.worker_count) {
            return Err(ConfigError::InvalidValue {
                field: "worker_count",
                reason: format!("must be between 1 and {}", MAX_WORKER_COUNT),
            });
        }

        Ok(())
    }
}

/// A table reference must be `dataset.table` or `project.dataset.table`
fn validate_table_ref(field: &'static str, reference: &str) -> Result<(), ConfigError> {
    if reference.trim().is_empty() {
        return Err(ConfigError::MissingField(field));
    }

    let parts: Vec<&str> = reference.split('.').collect();
    if !(2..=3).contains(&parts.len()) || parts.iter().any(|p| p.trim().is_empty()) {
        return Err(ConfigError::InvalidValue {
            field,
            reason: format!(
                "'{}' is not of the form dataset.table or project.dataset.table",
                reference
            ),
        });
    }

    Ok(())
}

/// Configuration with every value optional, one per source
///
/// Sources are layered with [`PartialConfig::overlay`] (later wins) and
/// resolved with [`PartialConfig::build`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialConfig {
    pub project_id: Option<String>,
    pub metadata_table_ref: Option<String>,
    pub audit_table_ref: Option<String>,
    pub sleep_interval_ms: Option<u64>,
    pub worker_count: Option<usize>,
    pub enable_local_log: Option<bool>,
    pub credentials_path: Option<PathBuf>,
}

impl PartialConfig {
    /// Load config from TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

        Self::from_toml(&contents)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Layer `other` on top of `self`; values set in `other` win
    pub fn overlay(self, other: PartialConfig) -> Self {
        Self {
            project_id: other.project_id.or(self.project_id),
            metadata_table_ref: other.metadata_table_ref.or(self.metadata_table_ref),
            audit_table_ref: other.audit_table_ref.or(self.audit_table_ref),
            sleep_interval_ms: other.sleep_interval_ms.or(self.sleep_interval_ms),
            worker_count: other.worker_count.or(self.worker_count),
            enable_local_log: other.enable_local_log.or(self.enable_local_log),
            credentials_path: other.credentials_path.or(self.credentials_path),
        }
    }

    /// Fill defaults, check required values, and freeze
    pub fn build(self) -> Result<SyncConfig, ConfigError> {
        let config = SyncConfig {
            project_id: self.project_id.ok_or(ConfigError::MissingField("project_id"))?,
            metadata_table_ref: self
                .metadata_table_ref
                .ok_or(ConfigError::MissingField("metadata_table_ref"))?,
            audit_table_ref: self
                .audit_table_ref
                .ok_or(ConfigError::MissingField("audit_table_ref"))?,
            sleep_interval_ms: self.sleep_interval_ms.unwrap_or(DEFAULT_SLEEP_INTERVAL_MS),
            worker_count: self.worker_count.unwrap_or(DEFAULT_WORKER_COUNT),
            enable_local_log: self.enable_local_log.unwrap_or(false),
            credentials_path: self.credentials_path,
        };

        config.validate()?;
        Ok(config)
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Missing required setting: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}
