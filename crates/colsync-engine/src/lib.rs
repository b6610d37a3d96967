//! colsync engine - column-description reconciliation
//!
//! This crate implements the reconciliation run:
//! - Planning: compare catalog descriptions with live columns
//! - Execution: apply description changes with a pause after each
//! - Scheduling: per-table work on a bounded pool
//! - Reporting: progress output, audit trail and the run summary

pub mod executor;
pub mod planner;
pub mod reporter;
pub mod scheduler;

pub use executor::MutationExecutor;
pub use planner::{plan_column, ColumnPlan};
pub use reporter::{RunReport, RunReporter};
pub use scheduler::{
    group_records, ColumnOutcome, Dispatch, DispatchReport, GroupResult, Grouping, Scheduler,
    TableGroup, TableIssue,
};

use colsync_catalog::{AuditSink, MetadataError, MetadataSource, TableIdentifier, WarehouseAdapter};
use colsync_core::{ConfigError, RunContext, SyncConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

/// Failures that stop a run before or outside per-column work
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid table reference '{reference}': {reason}")]
    InvalidTableRef { reference: String, reason: String },

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("{0} table worker(s) failed unexpectedly")]
    WorkerFailed(usize),
}

/// One reconciliation run and its collaborators
pub struct Reconciler {
    config: SyncConfig,
    warehouse: Arc<dyn WarehouseAdapter>,
    source: Arc<dyn MetadataSource>,
    sink: Arc<dyn AuditSink>,
    echo: bool,
    log_dir: PathBuf,
    context: Option<RunContext>,
}

impl Reconciler {
    pub fn new(
        config: SyncConfig,
        warehouse: Arc<dyn WarehouseAdapter>,
        source: Arc<dyn MetadataSource>,
        sink: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            config,
            warehouse,
            source,
            sink,
            echo: true,
            log_dir: PathBuf::from("."),
            context: None,
        }
    }

    /// Print progress lines to stdout (on by default)
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Directory for the local log file
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    /// Use a fixed run context instead of starting the clock at `run`
    pub fn with_context(mut self, context: RunContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Execute the run to completion or interruption
    ///
    /// Only configuration and catalog-read failures are returned as errors;
    /// everything scoped to a table or column ends up in the summary.
    pub async fn run(self, cancel: watch::Receiver<bool>) -> Result<RunReport, SyncError> {
        self.config.validate()?;
        let metadata_table = resolve_table(&self.config.metadata_table_ref, &self.config.project_id)?;
        let audit_table = resolve_table(&self.config.audit_table_ref, &self.config.project_id)?;

        let context = self
            .context
            .clone()
            .unwrap_or_else(|| RunContext::new(&self.config));
        tracing::info!(run_id = %context.run_id, "starting reconciliation run");

        let mut reporter = RunReporter::new(context.clone(), self.echo);
        if self.config.enable_local_log {
            if let Err(e) = reporter.enable_local_log(&self.log_dir) {
                tracing::warn!(dir = %self.log_dir.display(), "local log unavailable: {}", e);
            }
        }
        reporter.banner(&metadata_table, &audit_table);

        let records = self.source.read_metadata(&metadata_table).await?;
        let records_read = records.len();
        let grouping = group_records(records);
        reporter.records_loaded(records_read, grouping.groups.len(), grouping.duplicates);

        let scheduler = Scheduler::new(
            Arc::clone(&self.warehouse),
            &self.config.project_id,
            context.worker_count,
            context.sleep_interval,
        );
        // Dropping this future drops `dispatch`, which stops every worker
        let mut dispatch = scheduler.run(grouping.groups, cancel);

        while let Some(result) = dispatch.results.recv().await {
            reporter.record_group(result);
        }

        let report = dispatch.finished().await.map_err(|e| {
            tracing::error!("dispatcher failed: {}", e);
            SyncError::WorkerFailed(1)
        })?;
        if report.failed_workers > 0 {
            return Err(SyncError::WorkerFailed(report.failed_workers));
        }

        Ok(reporter
            .finish(
                self.sink.as_ref(),
                &audit_table,
                &report,
                records_read,
                grouping.duplicates,
            )
            .await)
    }
}

/// Resolve a configured table reference against the run's project
fn resolve_table(reference: &str, project_id: &str) -> Result<TableIdentifier, SyncError> {
    let table = TableIdentifier::parse(reference, project_id).ok_or_else(|| {
        SyncError::InvalidTableRef {
            reference: reference.to_string(),
            reason: "expected dataset.table or project.dataset.table".to_string(),
        }
    })?;

    table.validate().map_err(|reason| SyncError::InvalidTableRef {
        reference: reference.to_string(),
        reason,
    })?;

    Ok(table)
}
