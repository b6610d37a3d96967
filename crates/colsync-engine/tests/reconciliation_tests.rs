//! End-to-end reconciliation runs against the in-memory adapter
//!
//! ```bash
//! cargo test -p colsync-engine --test reconciliation_tests
//! ```

mod fixtures;

use colsync_catalog::{MetadataError, MockAdapterBuilder, MutationError, TableIdentifier};
use colsync_core::{AuditWrite, OutcomeStatus, RunStats};
use colsync_engine::SyncError;
use fixtures::{config, documented, many_tables, rec, reconciler, PROJECT};
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::sync::watch;

/// A dropped sender leaves the flag readable and never set
fn no_interrupt() -> watch::Receiver<bool> {
    watch::channel(false).1
}

// =============================================================================
// Outcome accounting
// =============================================================================

#[tokio::test]
async fn test_every_planned_record_gets_one_outcome() {
    let mock = MockAdapterBuilder::new()
        .with_schema(
            PROJECT,
            "sales",
            "orders",
            documented(&[("id", "Order id"), ("status", ""), ("total", "Old")]),
        )
        .with_error(
            PROJECT,
            "sales",
            "locked",
            colsync_catalog::FetchError::PermissionDenied("denied".to_string()),
        )
        .with_metadata(vec![
            rec("sales", "orders", "id", "Order id"),
            rec("sales", "orders", "status", "Lifecycle state"),
            rec("sales", "orders", "total", "Order total"),
            rec("sales", "orders", "nope", "Ghost"),
            rec("sales", "missing", "a", "A"),
            rec("sales", "locked", "b", "B"),
        ])
        .build();

    let report = reconciler(config(2), &mock).run(no_interrupt()).await.unwrap();
    let summary = &report.summary;

    assert_eq!(
        summary.stats,
        RunStats {
            updated: 2,
            skipped: 1,
            unmatched: 2,
            error: 1
        }
    );
    assert_eq!(summary.records_read, 6);
    assert!(summary.is_conserved());
    assert!(!summary.interrupted);
    assert_eq!(summary.audit, AuditWrite::Written(6));

    let rows = mock.audit_rows().await;
    assert_eq!(rows.len(), 6);
    assert!(rows.iter().all(|r| r.job_run_id == summary.run_id));
    assert!(summary.run_id.starts_with("job_"));
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let mock = MockAdapterBuilder::new()
        .with_schema(PROJECT, "sales", "orders", documented(&[("id", ""), ("status", "Old")]))
        .with_metadata(vec![
            rec("sales", "orders", "id", "Order id"),
            rec("sales", "orders", "status", "Lifecycle state"),
        ])
        .build();

    let first = reconciler(config(1), &mock).run(no_interrupt()).await.unwrap();
    assert_eq!(first.summary.stats.updated, 2);

    let second = reconciler(config(1), &mock).run(no_interrupt()).await.unwrap();
    assert_eq!(
        second.summary.stats,
        RunStats {
            skipped: 2,
            ..Default::default()
        }
    );
    assert_eq!(mock.alter_calls().await.len(), 2);
}

#[tokio::test]
async fn test_column_match_ignores_case_and_alters_live_name() {
    let mock = MockAdapterBuilder::new()
        .with_schema(PROJECT, "sales", "orders", documented(&[("Customer_ID", "")]))
        .with_metadata(vec![rec("sales", "orders", "CUSTOMER_id", "Buyer")])
        .build();

    let report = reconciler(config(1), &mock).run(no_interrupt()).await.unwrap();

    assert_eq!(report.summary.stats.updated, 1);
    let calls = mock.alter_calls().await;
    assert_eq!(calls[0].column, "Customer_ID");
    assert_eq!(calls[0].description, "Buyer");
}

#[tokio::test]
async fn test_whitespace_only_difference_is_skipped() {
    let mock = MockAdapterBuilder::new()
        .with_schema(PROJECT, "crm", "customers", documented(&[("is_active", "Active flag")]))
        .with_metadata(vec![rec("crm", "customers", "is_active", "  Active flag \n")])
        .build();

    let report = reconciler(config(1), &mock).run(no_interrupt()).await.unwrap();

    assert_eq!(report.summary.stats.skipped, 1);
    assert!(mock.alter_calls().await.is_empty());
}

// =============================================================================
// Fault isolation
// =============================================================================

#[tokio::test]
async fn test_missing_table_does_not_affect_other_tables() {
    let mock = MockAdapterBuilder::new()
        .with_schema(
            PROJECT,
            "ds",
            "t2",
            documented(&[("a", "A"), ("b", "B"), ("c", "C"), ("d", "old")]),
        )
        .with_metadata(vec![
            rec("ds", "t1", "x", "X"),
            rec("ds", "t1", "y", "Y"),
            rec("ds", "t2", "a", "A"),
            rec("ds", "t2", "b", "B"),
            rec("ds", "t2", "c", "C"),
            rec("ds", "t2", "d", "new"),
        ])
        .build();

    let report = reconciler(config(2), &mock).run(no_interrupt()).await.unwrap();

    assert_eq!(
        report.summary.stats,
        RunStats {
            updated: 1,
            skipped: 3,
            unmatched: 2,
            error: 0
        }
    );
    assert!(report
        .transcript
        .iter()
        .any(|line| line == "⚠️  Unmatched table   proj.ds.t1"));
    for column in ["x", "y"] {
        let row_line = format!("⚠️  Unmatched table   proj.ds.t1.{}", column);
        assert!(report.transcript.contains(&row_line), "missing {}", row_line);
    }

    let unmatched: Vec<_> = mock
        .audit_rows()
        .await
        .into_iter()
        .filter(|r| r.status == OutcomeStatus::Unmatched)
        .map(|r| r.column_name)
        .collect();
    assert_eq!(unmatched, vec!["x", "y"]);
}

#[tokio::test]
async fn test_failed_mutation_does_not_stop_the_table() {
    let mock = MockAdapterBuilder::new()
        .with_schema(PROJECT, "ds", "t", documented(&[("a", ""), ("b", ""), ("c", "")]))
        .with_mutation_error(
            PROJECT,
            "ds",
            "t",
            "b",
            MutationError::MalformedRequest("invalidQuery".to_string()),
        )
        .with_metadata(vec![rec("ds", "t", "a", "A"), rec("ds", "t", "b", "B"), rec("ds", "t", "c", "C")])
        .build();

    let report = reconciler(config(1), &mock).run(no_interrupt()).await.unwrap();

    assert_eq!(report.summary.stats.updated, 2);
    assert_eq!(report.summary.stats.error, 1);
    let schema = mock.schema(&TableIdentifier::new(PROJECT, "ds", "t")).await.unwrap();
    assert_eq!(schema.columns[2].description.as_deref(), Some("C"));
}

#[tokio::test]
async fn test_duplicate_rows_collapse_to_last_description() {
    let mock = MockAdapterBuilder::new()
        .with_schema(PROJECT, "ds", "t", documented(&[("col", "")]))
        .with_metadata(vec![rec("ds", "t", "col", "first"), rec("ds", "t", "COL", "second")])
        .build();

    let report = reconciler(config(1), &mock).run(no_interrupt()).await.unwrap();

    assert_eq!(report.summary.duplicates, 1);
    assert_eq!(report.summary.stats.total(), 1);
    assert!(report.summary.is_conserved());

    let rows = mock.audit_rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].description, "second");
    assert_eq!(rows[0].column_name, "col");

    let transcript = &report.transcript;
    assert!(transcript.iter().any(|line| line == "   Total     : 1"));
    assert!(transcript.iter().any(|line| line == "   Read      : 2"));
    assert!(transcript.iter().any(|line| line == "   Duplicates: 1"));
}

#[tokio::test]
async fn test_sink_failure_after_reconciliation_keeps_counts() {
    let (builder, records) = many_tables(10);
    let mock = builder.with_metadata(records).with_sink_failure().build();

    let report = reconciler(config(4), &mock).run(no_interrupt()).await.unwrap();

    assert_eq!(report.summary.stats.updated, 10);
    assert!(matches!(report.summary.audit, AuditWrite::Failed(_)));
    assert_eq!(mock.alter_calls().await.len(), 10);
}

#[tokio::test]
async fn test_unreadable_catalog_is_fatal_before_any_mutation() {
    let mock = MockAdapterBuilder::new()
        .with_schema(PROJECT, "ds", "t", documented(&[("a", "")]))
        .with_metadata_error(MetadataError::SourceUnavailable("403 Forbidden".to_string()))
        .build();

    let result = reconciler(config(1), &mock).run(no_interrupt()).await;

    assert!(matches!(result, Err(SyncError::Metadata(_))));
    assert!(mock.alter_calls().await.is_empty());
    assert!(mock.audit_rows().await.is_empty());
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let mock = MockAdapterBuilder::new().build();
    let result = reconciler(config(0), &mock).run(no_interrupt()).await;
    assert!(matches!(result, Err(SyncError::Config(_))));

    let result = reconciler(config(usize::MAX), &mock).run(no_interrupt()).await;
    assert!(matches!(result, Err(SyncError::Config(_))));
}

// =============================================================================
// Concurrency and interruption
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_tables_fill_every_worker_slot() {
    // Each fetch waits until three are in flight, so a pool that runs
    // fewer than three tables at once never finishes.
    let (builder, records) = many_tables(9);
    let mock = builder.with_metadata(records).with_fetch_rendezvous(3).build();

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        reconciler(config(3), &mock).run(no_interrupt()),
    )
    .await
    .expect("three tables were in flight together")
    .unwrap();

    assert_eq!(report.summary.stats.updated, 9);
    assert_eq!(mock.peak_concurrency(), 3);
}

#[tokio::test]
async fn test_interrupt_stops_dispatch_and_lets_running_table_finish() {
    let (builder, records) = many_tables(4);
    let mock = builder.with_metadata(records).with_held_fetches().build();
    let (tx, cancel) = watch::channel(false);

    let run = reconciler(config(1), &mock).run(cancel);
    // Interrupt while the first table is mid-fetch, then let it complete
    let interrupt = async {
        mock.wait_for_fetches(1).await;
        let _ = tx.send(true);
        mock.release_fetches(4);
    };
    let (result, ()) = tokio::join!(run, interrupt);
    let summary = result.unwrap().summary;

    assert!(summary.interrupted);
    assert_eq!(summary.stats.updated, 1);
    assert_eq!(summary.not_dispatched, 3);
    assert!(summary.is_conserved());
    assert_eq!(summary.audit, AuditWrite::Written(1));
    assert_eq!(mock.fetches_started(), 1);
}

#[tokio::test]
async fn test_dropped_run_stops_its_workers() {
    let (builder, records) = many_tables(2);
    let mock = builder.with_metadata(records).with_held_fetches().build();

    let mut run = Box::pin(reconciler(config(1), &mock).run(no_interrupt()));
    tokio::select! {
        _ = &mut run => panic!("run finished while its fetch was held"),
        _ = mock.wait_for_fetches(1) => {}
    }
    drop(run);

    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    mock.release_fetches(2);
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }

    assert!(mock.alter_calls().await.is_empty());
    assert!(mock.audit_rows().await.is_empty());
    assert_eq!(mock.fetches_started(), 1);
}
