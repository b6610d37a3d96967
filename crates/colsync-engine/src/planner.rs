//! Reconciliation planning: compare one desired description against the live schema
//!
//! Planning is pure. It never touches the warehouse, so every decision the
//! engine makes about a column can be tested from a schema snapshot alone.

use colsync_core::{MetadataRecord, SchemaSnapshot};

/// What to do with one metadata record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnPlan {
    /// Live description differs; alter `column` (warehouse casing)
    Update { column: String },

    /// Live description already matches
    Skip,

    /// No column with this name exists in the table
    ColumnNotFound,
}

/// Classify a record against the table's schema snapshot
///
/// Column names match ignoring ASCII case. Descriptions compare after
/// trimming both sides; a column without a description counts as empty.
pub fn plan_column(snapshot: &SchemaSnapshot, record: &MetadataRecord) -> ColumnPlan {
    let Some(live) = snapshot.get(&record.column) else {
        return ColumnPlan::ColumnNotFound;
    };

    if live.trimmed_description() == record.description.trim() {
        ColumnPlan::Skip
    } else {
        ColumnPlan::Update {
            column: live.name.clone(),
        }
    }
}
