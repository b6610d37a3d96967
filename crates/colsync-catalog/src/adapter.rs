//! Collaborator traits for the warehouse, the metadata catalog and the audit sink

use colsync_core::{AuditLogRow, MetadataRecord, Schema};
use std::fmt;

/// Identifies a table in a warehouse
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableIdentifier {
    /// Project name
    pub database: String,

    /// Dataset name
    pub schema: String,

    /// Table name
    pub table: String,
}

impl TableIdentifier {
    /// Create a new table identifier
    pub fn new(database: impl Into<String>, schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Parse `dataset.table` or `project.dataset.table`
    ///
    /// Two-part references resolve against `default_project`.
    pub fn parse(reference: &str, default_project: &str) -> Option<Self> {
        let parts: Vec<&str> = reference.trim().split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return None;
        }

        match parts.as_slice() {
            [dataset, table] => Some(Self::new(default_project, *dataset, *table)),
            [project, dataset, table] => Some(Self::new(*project, *dataset, *table)),
            _ => None,
        }
    }

    /// Get fully qualified name
    pub fn fqn(&self) -> String {
        format!("{}.{}.{}", self.database, self.schema, self.table)
    }

    /// Check every part can be safely placed inside a backtick-quoted identifier
    pub fn validate(&self) -> Result<(), String> {
        validate_identifier(&self.database)?;
        validate_identifier(&self.schema)?;
        validate_identifier(&self.table)
    }
}

impl fmt::Display for TableIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fqn())
    }
}

/// Reject identifiers that would escape a backtick-quoted name
///
/// Values (descriptions, filter literals) are always bound as query
/// parameters; identifiers cannot be, so they are checked here instead.
pub fn validate_identifier(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("identifier is empty".to_string());
    }

    if let Some(bad) = name
        .chars()
        .find(|c| *c == '`' || *c == '\\' || c.is_control())
    {
        return Err(format!("identifier '{}' contains forbidden character {:?}", name, bad));
    }

    Ok(())
}

/// Errors that can occur when fetching schemas
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Query failed: {0}")]
    QueryError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Errors from altering a column description
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MutationError {
    /// The statement was rejected as invalid; rerunning will not help
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Network, auth or rate-limit failure; a later rerun may succeed
    #[error("Transient error: {0}")]
    TransientError(String),
}

/// Errors from reading the governance catalog
#[derive(Debug, Clone, thiserror::Error)]
pub enum MetadataError {
    #[error("Metadata source unavailable: {0}")]
    SourceUnavailable(String),
}

/// Errors from the audit sink
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    #[error("Audit table could not be prepared: {0}")]
    TableSetup(String),

    #[error("Audit write failed: {0}")]
    WriteFailure(String),
}

/// Trait for warehouse adapters that can read and alter table schemas
#[async_trait::async_trait]
pub trait WarehouseAdapter: Send + Sync {
    /// Get the adapter name (e.g., "BigQuery")
    fn name(&self) -> &'static str;

    /// Fetch the current schema, including column descriptions
    ///
    /// A table that does not exist must be reported as
    /// [`FetchError::TableNotFound`].
    async fn fetch_schema(&self, table: &TableIdentifier) -> Result<Schema, FetchError>;

    /// Set the description of one column
    ///
    /// The description must be bound as a parameter, never spliced into
    /// statement text.
    async fn alter_column_description(
        &self,
        table: &TableIdentifier,
        column: &str,
        description: &str,
    ) -> Result<(), MutationError>;

    /// Test the connection to the warehouse
    async fn test_connection(&self) -> Result<(), FetchError>;
}

/// Source of governance metadata rows
#[async_trait::async_trait]
pub trait MetadataSource: Send + Sync {
    /// Read every record with a non-empty description, in source order
    async fn read_metadata(&self, table: &TableIdentifier) -> Result<Vec<MetadataRecord>, MetadataError>;
}

/// Destination for job-run audit rows
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    /// Create the audit table if it does not exist
    async fn ensure_table(&self, table: &TableIdentifier) -> Result<(), SinkError>;

    /// Insert all rows in one batch
    async fn insert_rows(&self, table: &TableIdentifier, rows: &[AuditLogRow]) -> Result<(), SinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_identifier() {
        let table = TableIdentifier::new("my_project", "my_dataset", "my_table");
        assert_eq!(table.database, "my_project");
        assert_eq!(table.schema, "my_dataset");
        assert_eq!(table.table, "my_table");
        assert_eq!(table.fqn(), "my_project.my_dataset.my_table");
        assert_eq!(table.to_string(), "my_project.my_dataset.my_table");
    }

    #[test]
    fn test_parse_two_and_three_part_refs() {
        assert_eq!(
            TableIdentifier::parse("gov.metadata", "proj"),
            Some(TableIdentifier::new("proj", "gov", "metadata"))
        );
        assert_eq!(
            TableIdentifier::parse("other.gov.metadata", "proj"),
            Some(TableIdentifier::new("other", "gov", "metadata"))
        );
        assert_eq!(TableIdentifier::parse("metadata", "proj"), None);
        assert_eq!(TableIdentifier::parse("gov..metadata", "proj"), None);
        assert_eq!(TableIdentifier::parse("a.b.c.d", "proj"), None);
    }

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("customer_id").is_ok());
        assert!(validate_identifier("my-project").is_ok());
        assert!(validate_identifier("bad`name").is_err());
        assert!(validate_identifier("bad\\name").is_err());
        assert!(validate_identifier("bad\nname").is_err());
        assert!(validate_identifier("  ").is_err());

        let table = TableIdentifier::new("proj", "ds", "t`; DROP TABLE x; --");
        assert!(table.validate().is_err());
    }
}
