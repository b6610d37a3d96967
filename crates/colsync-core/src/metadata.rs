//! Governance metadata rows and their table grouping key

use serde::{Deserialize, Serialize};
use std::fmt;

/// One desired column description from the governance catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Target dataset (without project prefix)
    pub dataset: String,

    /// Target table name
    pub table: String,

    /// Target column name, in the catalog's casing
    pub column: String,

    /// Desired description, trimmed
    pub description: String,
}

impl MetadataRecord {
    /// Create a record; the description is trimmed of surrounding whitespace
    pub fn new(
        dataset: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
        description: impl AsRef<str>,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            table: table.into(),
            column: column.into(),
            description: description.as_ref().trim().to_string(),
        }
    }

    /// Key of the table this record belongs to
    pub fn group_key(&self) -> TableGroupKey {
        TableGroupKey::new(&self.dataset, &self.table)
    }

    /// Column key used for duplicate detection within a table
    pub fn column_key(&self) -> String {
        self.column.to_lowercase()
    }
}

/// `(dataset, table)` pair that partitions records into independent work units
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableGroupKey {
    pub dataset: String,
    pub table: String,
}

impl TableGroupKey {
    pub fn new(dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}
