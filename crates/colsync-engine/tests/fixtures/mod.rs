//! Shared setup for reconciliation run tests

#![allow(dead_code)]

use colsync_catalog::{MockAdapter, MockAdapterBuilder};
use colsync_core::{Column, MetadataRecord, Schema, SyncConfig};
use colsync_engine::Reconciler;
use std::sync::Arc;

pub const PROJECT: &str = "proj";

/// Config with no post-mutation pause
pub fn config(workers: usize) -> SyncConfig {
    SyncConfig::new(PROJECT, "gov.metadata", "gov.job_runs")
        .with_sleep_interval_ms(0)
        .with_worker_count(workers)
}

/// Reconciler whose three collaborators are the same mock
pub fn reconciler(config: SyncConfig, mock: &MockAdapter) -> Reconciler {
    Reconciler::new(
        config,
        Arc::new(mock.clone()),
        Arc::new(mock.clone()),
        Arc::new(mock.clone()),
    )
    .with_echo(false)
}

/// Table whose columns already carry the given descriptions
pub fn documented(columns: &[(&str, &str)]) -> Schema {
    Schema::from_columns(
        columns
            .iter()
            .map(|(name, description)| {
                let column = Column::new(*name, "STRING");
                if description.is_empty() {
                    column
                } else {
                    column.with_description(*description)
                }
            })
            .collect(),
    )
}

pub fn rec(dataset: &str, table: &str, column: &str, description: &str) -> MetadataRecord {
    MetadataRecord::new(dataset, table, column, description)
}

/// `count` single-column tables, none documented yet
pub fn many_tables(count: usize) -> (MockAdapterBuilder, Vec<MetadataRecord>) {
    let mut builder = MockAdapterBuilder::new();
    let mut records = Vec::new();
    for i in 0..count {
        let table = format!("t{}", i);
        builder = builder.with_schema(PROJECT, "ds", &table, documented(&[("c", "")]));
        records.push(rec("ds", &table, "c", &format!("column of {}", table)));
    }
    (builder, records)
}
