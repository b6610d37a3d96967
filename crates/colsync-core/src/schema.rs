//! Live table schema types and the case-insensitive column index

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Column mode as reported by the warehouse
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnMode {
    #[default]
    Nullable,
    Required,
    Repeated,
}

impl ColumnMode {
    /// Parse a warehouse mode string; an absent mode means `NULLABLE`
    pub fn from_warehouse(mode: Option<&str>) -> Self {
        match mode.map(|m| m.trim().to_ascii_uppercase()).as_deref() {
            Some("REQUIRED") => Self::Required,
            Some("REPEATED") => Self::Repeated,
            _ => Self::Nullable,
        }
    }
}

/// A column in a live table schema
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Column {
    /// Column name, in the warehouse's casing
    pub name: String,

    /// Warehouse type name, e.g. `STRING` or `NUMERIC`
    pub data_type: String,

    #[serde(default)]
    pub mode: ColumnMode,

    /// Current column description, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Column {
    /// Create a nullable column with no description
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            mode: ColumnMode::Nullable,
            description: None,
        }
    }

    pub fn with_mode(mut self, mode: ColumnMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Description with surrounding whitespace removed; empty when absent
    pub fn trimmed_description(&self) -> &str {
        self.description.as_deref().unwrap_or("").trim()
    }
}

/// An ordered collection of columns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Ordered list of columns
    pub columns: Vec<Column>,
}

impl Schema {
    /// Create a schema from columns
    pub fn from_columns(columns: Vec<Column>) -> Self {
        Self { columns }
    }
}

/// Immutable view of a table schema, indexed by lower-cased column name
///
/// A snapshot is taken once per table and every column of that table is
/// reconciled against it. If the warehouse reports two columns that differ
/// only in case, the first one wins.
#[derive(Debug, Clone)]
pub struct SchemaSnapshot {
    columns: Vec<Column>,
    index: HashMap<String, usize>,
}

impl SchemaSnapshot {
    /// Build the case-insensitive index over a fetched schema
    pub fn new(schema: Schema) -> Self {
        let mut index = HashMap::with_capacity(schema.columns.len());
        for (position, column) in schema.columns.iter().enumerate() {
            index.entry(column.name.to_lowercase()).or_insert(position);
        }

        Self {
            columns: schema.columns,
            index,
        }
    }

    /// Look up a column ignoring ASCII and Unicode case
    pub fn get(&self, name: &str) -> Option<&Column> {
        self.index
            .get(&name.to_lowercase())
            .map(|&position| &self.columns[position])
    }

    /// Number of columns in the snapshot
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the snapshot has no columns
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl From<Schema> for SchemaSnapshot {
    fn from(schema: Schema) -> Self {
        Self::new(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn mode_parsing_defaults_to_nullable() {
        assert_eq!(ColumnMode::from_warehouse(Some("REQUIRED")), ColumnMode::Required);
        assert_eq!(ColumnMode::from_warehouse(Some("repeated")), ColumnMode::Repeated);
        assert_eq!(ColumnMode::from_warehouse(Some("NULLABLE")), ColumnMode::Nullable);
        assert_eq!(ColumnMode::from_warehouse(None), ColumnMode::Nullable);
    }

    #[test]
    fn snapshot_matches_case_insensitively() {
        let snapshot = SchemaSnapshot::new(Schema::from_columns(vec![
            Column::new("customer_id", "INT64").with_mode(ColumnMode::Required),
            Column::new("Email", "STRING").with_description("Contact"),
        ]));

        assert_eq!(snapshot.get("Customer_ID").map(|c| c.name.as_str()), Some("customer_id"));
        assert_eq!(snapshot.get("EMAIL").map(|c| c.name.as_str()), Some("Email"));
        assert!(snapshot.get("missing").is_none());
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn snapshot_keeps_first_of_case_colliding_columns() {
        let snapshot = SchemaSnapshot::new(Schema::from_columns(vec![
            Column::new("Flag", "BOOL").with_description("first"),
            Column::new("flag", "BOOL").with_description("second"),
        ]));

        assert_eq!(snapshot.get("FLAG").and_then(|c| c.description.as_deref()), Some("first"));
    }

    #[test]
    fn trimmed_description_defaults_to_empty() {
        let bare = Column::new("id", "INT64");
        let padded = Column::new("id", "INT64").with_description("  Active flag ");

        assert_eq!(bare.trimmed_description(), "");
        assert_eq!(padded.trimmed_description(), "Active flag");
    }

    #[test]
    fn column_serializes_mode_in_warehouse_casing() {
        let value = serde_json::to_value(Column::new("tags", "STRING").with_mode(ColumnMode::Repeated)).unwrap();
        assert_eq!(value["mode"], "REPEATED");
        assert!(value.get("description").is_none());
    }
}
