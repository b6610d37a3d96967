//! Work scheduler: groups records by table and reconciles tables on a bounded pool
//!
//! Each table is one unit of work. A group fetches its schema exactly once,
//! then walks its columns sequentially in catalog order against that single
//! snapshot. Groups run concurrently, at most `worker_count` at a time, and
//! hand their results to the reporter over a channel; workers never touch
//! shared counters themselves.

use crate::executor::MutationExecutor;
use crate::planner::{plan_column, ColumnPlan};
use chrono::{DateTime, Utc};
use colsync_catalog::{FetchError, TableIdentifier, WarehouseAdapter};
use colsync_core::{
    MetadataRecord, ReconciliationAction, SchemaSnapshot, TableGroupKey, UnmatchedReason,
    MAX_WORKER_COUNT,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};

/// All planned records of one `(dataset, table)` in catalog order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableGroup {
    pub key: TableGroupKey,
    pub records: Vec<MetadataRecord>,
}

/// Catalog records partitioned into table groups
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grouping {
    /// Groups in order of first appearance
    pub groups: Vec<TableGroup>,

    /// Records superseded by a later row for the same column
    pub duplicates: usize,
}

impl Grouping {
    /// Number of records that will be reconciled
    pub fn planned_records(&self) -> usize {
        self.groups.iter().map(|g| g.records.len()).sum()
    }
}

/// Partition records by table, collapsing duplicate columns
///
/// Duplicates share `(dataset, table, lower(column))`. The last row's
/// description wins, but the entry keeps the position of the first row.
pub fn group_records(records: Vec<MetadataRecord>) -> Grouping {
    let mut grouping = Grouping::default();
    let mut group_index: HashMap<TableGroupKey, usize> = HashMap::new();
    let mut column_index: Vec<HashMap<String, usize>> = Vec::new();

    for record in records {
        let key = record.group_key();
        let g = *group_index.entry(key.clone()).or_insert_with(|| {
            grouping.groups.push(TableGroup {
                key,
                records: Vec::new(),
            });
            column_index.push(HashMap::new());
            grouping.groups.len() - 1
        });

        let group = &mut grouping.groups[g];
        let column_key = record.column_key();
        match column_index[g].get(&column_key).copied() {
            Some(existing) => {
                tracing::debug!(
                    table = %group.key,
                    column = %record.column,
                    "duplicate catalog row supersedes earlier description"
                );
                group.records[existing].description = record.description;
                grouping.duplicates += 1;
            }
            None => {
                column_index[g].insert(column_key, group.records.len());
                group.records.push(record);
            }
        }
    }

    grouping
}

/// Outcome of one planned record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnOutcome {
    pub record: MetadataRecord,
    pub action: ReconciliationAction,

    /// When the outcome was decided
    pub at: DateTime<Utc>,
}

/// Why a whole table produced no schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableIssue {
    Missing,
    Unreadable(String),
}

/// Everything one worker produced for one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupResult {
    pub table: TableIdentifier,
    pub issue: Option<TableIssue>,
    pub outcomes: Vec<ColumnOutcome>,
}

/// Dispatcher bookkeeping, available once every dispatched group finished
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub dispatched_groups: usize,

    /// Records of groups skipped because of an interrupt
    pub not_dispatched: usize,

    pub interrupted: bool,

    /// Worker tasks that panicked instead of returning a result
    pub failed_workers: usize,
}

/// Handles to a running dispatch
///
/// Dropping a `Dispatch` aborts the dispatcher together with its workers, so
/// an abandoned run never keeps altering tables nobody will report on.
pub struct Dispatch {
    /// Group results in completion order; closes after the last group
    pub results: mpsc::Receiver<GroupResult>,

    dispatcher: JoinHandle<DispatchReport>,
}

impl Dispatch {
    /// Wait for the dispatcher's bookkeeping; call after `results` closed
    pub async fn finished(mut self) -> Result<DispatchReport, JoinError> {
        (&mut self.dispatcher).await
    }
}

impl Drop for Dispatch {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

/// Bounded pool that reconciles table groups
pub struct Scheduler {
    warehouse: Arc<dyn WarehouseAdapter>,
    executor: MutationExecutor,
    project_id: String,
    worker_count: usize,
}

impl Scheduler {
    pub fn new(
        warehouse: Arc<dyn WarehouseAdapter>,
        project_id: impl Into<String>,
        worker_count: usize,
        sleep_interval: Duration,
    ) -> Self {
        Self {
            executor: MutationExecutor::new(Arc::clone(&warehouse), sleep_interval),
            warehouse,
            project_id: project_id.into(),
            worker_count: worker_count.clamp(1, MAX_WORKER_COUNT),
        }
    }

    /// Start dispatching groups in order
    ///
    /// A worker slot is acquired before a group is spawned. Once `cancel`
    /// turns true no further group is dispatched; groups already running
    /// finish normally.
    pub fn run(self, groups: Vec<TableGroup>, cancel: watch::Receiver<bool>) -> Dispatch {
        let (tx, rx) = mpsc::channel(self.worker_count.saturating_mul(2));
        let dispatcher = tokio::spawn(self.dispatch(groups, cancel, tx));
        Dispatch {
            results: rx,
            dispatcher,
        }
    }

    async fn dispatch(
        self,
        groups: Vec<TableGroup>,
        mut cancel: watch::Receiver<bool>,
        tx: mpsc::Sender<GroupResult>,
    ) -> DispatchReport {
        let slots = Arc::new(Semaphore::new(self.worker_count));
        let worker = Arc::new(self);
        let mut report = DispatchReport::default();
        let mut workers = JoinSet::new();
        let mut pending = groups.into_iter();

        while let Some(group) = pending.next() {
            if *cancel.borrow() {
                report.interrupted = true;
            } else {
                let permit = tokio::select! {
                    biased;
                    _ = cancelled(&mut cancel) => {
                        report.interrupted = true;
                        None
                    }
                    permit = Arc::clone(&slots).acquire_owned() => permit.ok(),
                };

                if let Some(permit) = permit {
                    report.dispatched_groups += 1;
                    let worker = Arc::clone(&worker);
                    let tx = tx.clone();
                    workers.spawn(async move {
                        let result = worker.reconcile_group(group).await;
                        drop(permit);
                        // Fails only when the run was dropped, which aborts this task too
                        let _ = tx.send(result).await;
                    });
                    continue;
                }
            }

            report.not_dispatched =
                group.records.len() + pending.by_ref().map(|g| g.records.len()).sum::<usize>();
            break;
        }

        if report.interrupted {
            tracing::warn!(
                dispatched = report.dispatched_groups,
                not_dispatched = report.not_dispatched,
                "interrupt received; waiting for in-flight tables"
            );
        }

        drop(tx);
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("table worker failed: {}", e);
                report.failed_workers += 1;
            }
        }

        report
    }

    /// Fetch the schema once and reconcile every column in order
    async fn reconcile_group(&self, group: TableGroup) -> GroupResult {
        let table = TableIdentifier::new(&self.project_id, &group.key.dataset, &group.key.table);

        let fetched = match table.validate() {
            Ok(()) => self.warehouse.fetch_schema(&table).await,
            Err(reason) => Err(FetchError::ConfigError(reason)),
        };

        let snapshot = match fetched {
            Ok(schema) => SchemaSnapshot::new(schema),
            Err(FetchError::TableNotFound(_)) => {
                tracing::info!(table = %table, "table not found");
                let action = ReconciliationAction::Unmatched(UnmatchedReason::TableNotFound);
                return Self::whole_table(table, TableIssue::Missing, group.records, action);
            }
            Err(error) => {
                tracing::warn!(table = %table, "schema fetch failed: {}", error);
                let cause = error.to_string();
                return Self::whole_table(
                    table,
                    TableIssue::Unreadable(cause.clone()),
                    group.records,
                    ReconciliationAction::Error(cause),
                );
            }
        };

        let mut outcomes = Vec::with_capacity(group.records.len());
        for record in group.records {
            let action = match plan_column(&snapshot, &record) {
                ColumnPlan::Skip => ReconciliationAction::Skipped,
                ColumnPlan::ColumnNotFound => {
                    ReconciliationAction::Unmatched(UnmatchedReason::ColumnNotFound)
                }
                ColumnPlan::Update { column } => {
                    self.executor.apply(&table, &column, &record.description).await
                }
            };
            outcomes.push(ColumnOutcome {
                record,
                action,
                at: Utc::now(),
            });
        }

        GroupResult {
            table,
            issue: None,
            outcomes,
        }
    }

    fn whole_table(
        table: TableIdentifier,
        issue: TableIssue,
        records: Vec<MetadataRecord>,
        action: ReconciliationAction,
    ) -> GroupResult {
        let at = Utc::now();
        GroupResult {
            table,
            issue: Some(issue),
            outcomes: records
                .into_iter()
                .map(|record| ColumnOutcome {
                    record,
                    action: action.clone(),
                    at,
                })
                .collect(),
        }
    }
}

/// Resolve once the interrupt flag is set; never resolves if the sender is gone
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colsync_catalog::MockAdapterBuilder;
    use colsync_core::{Column, Schema};
    use pretty_assertions::assert_eq;

    fn rec(dataset: &str, table: &str, column: &str, description: &str) -> MetadataRecord {
        MetadataRecord::new(dataset, table, column, description)
    }

    #[test]
    fn test_grouping_preserves_first_seen_order() {
        let grouping = group_records(vec![
            rec("a", "t2", "x", "1"),
            rec("a", "t1", "y", "2"),
            rec("a", "t2", "z", "3"),
            rec("b", "t2", "x", "4"),
        ]);

        let keys: Vec<String> = grouping.groups.iter().map(|g| g.key.to_string()).collect();
        assert_eq!(keys, vec!["a.t2", "a.t1", "b.t2"]);
        assert_eq!(
            grouping.groups[0].records,
            vec![rec("a", "t2", "x", "1"), rec("a", "t2", "z", "3")]
        );
        assert_eq!(grouping.duplicates, 0);
        assert_eq!(grouping.planned_records(), 4);
    }

    #[test]
    fn test_duplicates_last_description_first_position() {
        let grouping = group_records(vec![
            rec("a", "t", "col", "first"),
            rec("a", "t", "other", "o"),
            rec("a", "t", "COL", "second"),
            rec("a", "t", "Col", "third"),
        ]);

        assert_eq!(grouping.duplicates, 2);
        assert_eq!(
            grouping.groups[0].records,
            vec![rec("a", "t", "col", "third"), rec("a", "t", "other", "o")]
        );
        assert_eq!(grouping.planned_records(), 2);
    }

    fn scheduler(adapter: colsync_catalog::MockAdapter, workers: usize) -> Scheduler {
        Scheduler::new(Arc::new(adapter), "p", workers, Duration::ZERO)
    }

    async fn collect(mut dispatch: Dispatch) -> (Vec<GroupResult>, DispatchReport) {
        let mut results = Vec::new();
        while let Some(result) = dispatch.results.recv().await {
            results.push(result);
        }
        let report = dispatch.finished().await.unwrap();
        (results, report)
    }

    #[tokio::test]
    async fn test_missing_table_marks_every_column_unmatched() {
        let adapter = MockAdapterBuilder::new().build();
        let grouping = group_records(vec![rec("d", "gone", "a", "x"), rec("d", "gone", "b", "y")]);
        let (_tx, cancel) = watch::channel(false);

        let (results, report) = collect(scheduler(adapter, 2).run(grouping.groups, cancel)).await;

        assert_eq!(report.dispatched_groups, 1);
        assert_eq!(results[0].issue, Some(TableIssue::Missing));
        assert!(results[0].outcomes.iter().all(|o| o.action
            == ReconciliationAction::Unmatched(UnmatchedReason::TableNotFound)));
    }

    #[tokio::test]
    async fn test_fetch_error_marks_every_column_error() {
        let adapter = MockAdapterBuilder::new()
            .with_error("p", "d", "locked", FetchError::PermissionDenied("denied".to_string()))
            .build();
        let grouping = group_records(vec![rec("d", "locked", "a", "x")]);
        let (_tx, cancel) = watch::channel(false);

        let (results, _) = collect(scheduler(adapter, 1).run(grouping.groups, cancel)).await;

        assert_eq!(
            results[0].outcomes[0].action,
            ReconciliationAction::Error("Permission denied: denied".to_string())
        );
        assert!(matches!(results[0].issue, Some(TableIssue::Unreadable(_))));
    }

    #[tokio::test]
    async fn test_schema_fetched_once_per_table() {
        let adapter = MockAdapterBuilder::new()
            .with_schema(
                "p",
                "d",
                "t",
                Schema::from_columns(vec![
                    Column::new("a", "INT64"),
                    Column::new("b", "INT64"),
                ]),
            )
            .build();
        let grouping = group_records(vec![
            rec("d", "t", "a", "x"),
            rec("d", "t", "b", "y"),
            rec("d", "t", "c", "z"),
        ]);
        let (_tx, cancel) = watch::channel(false);

        let (results, _) = collect(scheduler(adapter.clone(), 3).run(grouping.groups, cancel)).await;

        let actions: Vec<_> = results[0].outcomes.iter().map(|o| o.action.clone()).collect();
        assert_eq!(
            actions,
            vec![
                ReconciliationAction::Updated,
                ReconciliationAction::Updated,
                ReconciliationAction::Unmatched(UnmatchedReason::ColumnNotFound),
            ]
        );
        assert_eq!(adapter.fetch_count(&TableIdentifier::new("p", "d", "t")).await, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_dispatches_nothing() {
        let adapter = MockAdapterBuilder::new().build();
        let grouping = group_records(vec![
            rec("d", "t1", "a", "x"),
            rec("d", "t2", "a", "x"),
            rec("d", "t2", "b", "x"),
        ]);
        let (_tx, cancel) = watch::channel(true);

        let (results, report) = collect(scheduler(adapter, 2).run(grouping.groups, cancel)).await;

        assert!(results.is_empty());
        assert_eq!(
            report,
            DispatchReport {
                dispatched_groups: 0,
                not_dispatched: 3,
                interrupted: true,
                failed_workers: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_oversized_worker_count_is_clamped() {
        let adapter = MockAdapterBuilder::new()
            .with_schema("p", "d", "t", Schema::from_columns(vec![Column::new("a", "INT64")]))
            .build();
        let grouping = group_records(vec![rec("d", "t", "a", "x")]);
        let (_tx, cancel) = watch::channel(false);

        let scheduler = scheduler(adapter, usize::MAX);
        assert_eq!(scheduler.worker_count, MAX_WORKER_COUNT);

        let (results, report) = collect(scheduler.run(grouping.groups, cancel)).await;
        assert_eq!(report.dispatched_groups, 1);
        assert_eq!(results[0].outcomes[0].action, ReconciliationAction::Updated);
    }

    #[tokio::test]
    async fn test_dropping_dispatch_stops_workers() {
        let adapter = MockAdapterBuilder::new()
            .with_schema("p", "d", "t1", Schema::from_columns(vec![Column::new("a", "INT64")]))
            .with_schema("p", "d", "t2", Schema::from_columns(vec![Column::new("a", "INT64")]))
            .with_held_fetches()
            .build();
        let grouping = group_records(vec![rec("d", "t1", "a", "x"), rec("d", "t2", "a", "x")]);
        let (_tx, cancel) = watch::channel(false);

        let dispatch = scheduler(adapter.clone(), 1).run(grouping.groups, cancel);
        adapter.wait_for_fetches(1).await;
        drop(dispatch);
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        adapter.release_fetches(2);
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        assert!(adapter.alter_calls().await.is_empty());
        assert_eq!(adapter.fetches_started(), 1);
    }
}
