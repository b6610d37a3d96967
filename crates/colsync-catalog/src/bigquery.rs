//! BigQuery adapter: schema inspection, description mutation, catalog reads
//! and audit writes
//!
//! Schemas come from the `tables.get` API, which returns every top-level
//! field with its type, mode and description. Query jobs (ALTER statements
//! and catalog reads) are polled until complete and read page by page.
//! Required IAM permissions:
//! - bigquery.tables.get, bigquery.tables.update
//! - bigquery.jobs.create
//! - bigquery.tables.updateData on the audit table
//!
//! ## Authentication
//!
//! 1. Service account JSON file (explicit path)
//! 2. Application Default Credentials (ADC)
//!
//! ## Usage
//!
//! ```rust,ignore
//! let adapter = BigQueryAdapter::with_adc("my-project").await?;
//! let table = TableIdentifier::new("my-project", "sales", "orders");
//! let schema = adapter.fetch_schema(&table).await?;
//! adapter.alter_column_description(&table, "id", "Order id").await?;
//! ```
//!
//! All values are bound as named query parameters. Identifiers cannot be
//! parameterized in BigQuery, so they are validated before being quoted.

use crate::adapter::{
    AuditSink, FetchError, MetadataError, MetadataSource, MutationError, SinkError,
    TableIdentifier, WarehouseAdapter,
};
use colsync_core::{AuditLogRow, Column, ColumnMode, MetadataRecord, Schema};

#[cfg(feature = "bigquery")]
use gcp_bigquery_client::{
    model::get_query_results_parameters::GetQueryResultsParameters,
    model::query_parameter::QueryParameter,
    model::query_parameter_type::QueryParameterType,
    model::query_parameter_value::QueryParameterValue,
    model::query_request::QueryRequest,
    model::query_response::QueryResponse,
    model::table::Table,
    model::table_data_insert_all_request::TableDataInsertAllRequest,
    model::table_field_schema::TableFieldSchema,
    model::table_row::TableRow,
    model::table_schema::TableSchema,
    Client as BigQueryClient,
};

/// Rows per streaming insert request
const INSERT_CHUNK_SIZE: usize = 500;

/// Polls of a still-running job before the read is abandoned
#[cfg(feature = "bigquery")]
const MAX_COMPLETION_POLLS: usize = 60;

const NOT_COMPILED: &str =
    "BigQuery support not compiled. Rebuild with: cargo build --features bigquery";

/// BigQuery warehouse adapter
#[derive(Clone)]
pub struct BigQueryAdapter {
    /// Project that runs the query jobs
    project_id: String,

    /// BigQuery client (only available with bigquery feature)
    #[cfg(feature = "bigquery")]
    client: BigQueryClient,
}

impl BigQueryAdapter {
    /// Create a new BigQuery adapter using Application Default Credentials (ADC)
    ///
    /// ADC automatically detects credentials from:
    /// - GOOGLE_APPLICATION_CREDENTIALS environment variable
    /// - gcloud CLI default credentials
    /// - GCE/GKE metadata service
    #[cfg(feature = "bigquery")]
    pub async fn with_adc(project_id: impl Into<String>) -> Result<Self, FetchError> {
        let project_id = project_id.into();

        let client = BigQueryClient::from_application_default_credentials()
            .await
            .map_err(|e| FetchError::AuthenticationError(format!(
                "Failed to authenticate with ADC: {}. \
                 Ensure GOOGLE_APPLICATION_CREDENTIALS is set or run 'gcloud auth application-default login'",
                e
            )))?;

        Ok(Self { project_id, client })
    }

    /// Create adapter without bigquery feature (returns error)
    #[cfg(not(feature = "bigquery"))]
    pub async fn with_adc(project_id: impl Into<String>) -> Result<Self, FetchError> {
        let _ = project_id;
        Err(FetchError::ConfigError(NOT_COMPILED.to_string()))
    }

    /// Create a new BigQuery adapter using a service account key file
    #[cfg(feature = "bigquery")]
    pub async fn from_service_account_file(
        project_id: impl Into<String>,
        key_path: impl AsRef<std::path::Path>,
    ) -> Result<Self, FetchError> {
        let project_id = project_id.into();
        let key_path_str = key_path.as_ref().to_string_lossy().to_string();

        let client = BigQueryClient::from_service_account_key_file(&key_path_str)
            .await
            .map_err(|e| FetchError::AuthenticationError(format!(
                "Failed to read service account key file '{}': {}",
                key_path_str, e
            )))?;

        Ok(Self { project_id, client })
    }

    /// Create adapter without bigquery feature (returns error)
    #[cfg(not(feature = "bigquery"))]
    pub async fn from_service_account_file(
        project_id: impl Into<String>,
        _key_path: impl AsRef<std::path::Path>,
    ) -> Result<Self, FetchError> {
        let _ = project_id;
        Err(FetchError::ConfigError(NOT_COMPILED.to_string()))
    }

    /// Connect with a key file when one is configured, ADC otherwise
    pub async fn connect(
        project_id: &str,
        credentials_path: Option<&std::path::Path>,
    ) -> Result<Self, FetchError> {
        match credentials_path {
            Some(path) => Self::from_service_account_file(project_id, path).await,
            None => Self::with_adc(project_id).await,
        }
    }

    /// Project that runs the query jobs
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Classify a failed schema read
    pub fn classify_fetch_error(table: &TableIdentifier, message: &str) -> FetchError {
        if message.contains("Not found") || message.contains("notFound") {
            FetchError::TableNotFound(table.fqn())
        } else if message.contains("Access Denied") || message.contains("Permission") {
            FetchError::PermissionDenied(format!("Cannot access {}: {}", table.fqn(), message))
        } else if message.contains("Unauthorized") || message.contains("invalid_grant") {
            FetchError::AuthenticationError(message.to_string())
        } else {
            FetchError::QueryError(message.to_string())
        }
    }

    /// Classify a failed ALTER statement
    ///
    /// Bad requests (invalid identifiers, invalid option values) are
    /// permanent; everything else is treated as transient.
    pub fn classify_mutation_error(message: &str) -> MutationError {
        let permanent = ["invalidQuery", "invalid query", "Bad Request", "badRequest", "Syntax error"];
        if permanent.iter().any(|marker| message.contains(marker)) {
            MutationError::MalformedRequest(message.to_string())
        } else {
            MutationError::TransientError(message.to_string())
        }
    }

    /// Build the ALTER statement; the description is bound as `@description`
    fn alter_statement(table: &TableIdentifier, column: &str) -> String {
        format!(
            "ALTER TABLE `{}` ALTER COLUMN `{}` SET OPTIONS (description = @description)",
            table.fqn(),
            column
        )
    }

    /// Build the catalog query. Rows are decoded by position, so the
    /// select list order is fixed.
    fn metadata_query(table: &TableIdentifier) -> String {
        format!(
            r#"
            SELECT
                target_dataset_name,
                table_name,
                column_name,
                column_metadata
            FROM `{}`
            WHERE column_metadata IS NOT NULL
            "#,
            table.fqn()
        )
    }

    #[cfg(feature = "bigquery")]
    fn string_parameter(name: &str, value: &str) -> QueryParameter {
        QueryParameter {
            name: Some(name.to_string()),
            parameter_type: Some(QueryParameterType {
                array_type: None,
                struct_types: None,
                r#type: "STRING".to_string(),
            }),
            parameter_value: Some(QueryParameterValue {
                array_values: None,
                struct_values: None,
                value: Some(value.to_string()),
            }),
        }
    }

    #[cfg(feature = "bigquery")]
    fn parameterized(sql: String, parameters: Vec<QueryParameter>) -> QueryRequest {
        let mut request = QueryRequest::new(sql);
        request.parameter_mode = Some("NAMED".to_string());
        request.query_parameters = Some(parameters);
        request
    }

    #[cfg(feature = "bigquery")]
    async fn run_query(&self, request: QueryRequest) -> Result<QueryResponse, String> {
        self.client
            .job()
            .query(&self.project_id, request)
            .await
            .map_err(|e| e.to_string())
    }

    /// Run a query to completion and collect every result row
    ///
    /// `jobs.query` returns before the job finishes when it outlives the
    /// request timeout, and large results arrive in pages. Both cases are
    /// followed through `jobs.getQueryResults` on the same job.
    #[cfg(feature = "bigquery")]
    async fn query_rows(&self, request: QueryRequest) -> Result<Vec<TableRow>, String> {
        let response = self.run_query(request).await?;
        let reference = response.job_reference.clone();

        let mut complete = response.job_complete == Some(true);
        let mut rows = Vec::new();
        let mut page_token = None;
        if complete {
            rows.extend(response.rows.unwrap_or_default());
            page_token = response.page_token;
        }

        let mut polls = 0usize;
        while !complete || page_token.is_some() {
            let job_id = reference
                .as_ref()
                .and_then(|r| r.job_id.as_deref())
                .ok_or_else(|| "query returned no job reference to read results from".to_string())?;

            if !complete {
                polls += 1;
                if polls > MAX_COMPLETION_POLLS {
                    return Err(format!("job {} did not complete", job_id));
                }
            }

            let parameters = GetQueryResultsParameters {
                page_token: page_token.take(),
                location: reference.as_ref().and_then(|r| r.location.clone()),
                // Server-side wait while the job is still running
                timeout_ms: Some(10_000),
                ..Default::default()
            };
            let page = self
                .client
                .job()
                .get_query_results(&self.project_id, job_id, parameters)
                .await
                .map_err(|e| e.to_string())?;

            complete = page.job_complete == Some(true);
            if complete {
                rows.extend(page.rows.unwrap_or_default());
                page_token = page.page_token;
            }
        }

        tracing::debug!(rows = rows.len(), polls, "query results read");
        Ok(rows)
    }

    /// Convert the top-level fields of a `tables.get` response
    #[cfg(feature = "bigquery")]
    fn schema_from_fields(fields: &[TableFieldSchema]) -> Schema {
        let columns = fields
            .iter()
            .map(|field| {
                warehouse_column(
                    &field.name,
                    &format!("{:?}", field.r#type),
                    field.mode.as_deref(),
                    field.description.clone(),
                )
            })
            .collect();
        Schema::from_columns(columns)
    }
}

/// Build a column from the raw strings a warehouse reports
#[cfg_attr(not(feature = "bigquery"), allow(dead_code))]
fn warehouse_column(name: &str, type_name: &str, mode: Option<&str>, description: Option<String>) -> Column {
    let mut column = Column::new(name, type_name.to_uppercase()).with_mode(ColumnMode::from_warehouse(mode));
    column.description = description;
    column
}

/// Decode one catalog row from its cells in select-list order
///
/// Rows with a blank description are dropped silently; rows missing a
/// dataset, table or column are dropped with a warning.
#[cfg_attr(not(feature = "bigquery"), allow(dead_code))]
fn record_from_cells(cells: &[Option<String>]) -> Option<MetadataRecord> {
    let cell = |index: usize| cells.get(index).cloned().flatten().unwrap_or_default();
    let record = MetadataRecord::new(cell(0), cell(1), cell(2), cell(3));

    if record.description.is_empty() {
        return None;
    }
    if record.dataset.is_empty() || record.table.is_empty() || record.column.is_empty() {
        tracing::warn!(?record, "skipping metadata row with an empty dataset, table or column");
        return None;
    }
    Some(record)
}

#[cfg(feature = "bigquery")]
fn row_cells(row: &TableRow) -> Vec<Option<String>> {
    row.columns
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|cell| cell.value.as_ref().and_then(|v| v.as_str()).map(str::to_string))
        .collect()
}

#[async_trait::async_trait]
impl WarehouseAdapter for BigQueryAdapter {
    fn name(&self) -> &'static str {
        "BigQuery"
    }

    #[cfg(feature = "bigquery")]
    async fn fetch_schema(&self, table: &TableIdentifier) -> Result<Schema, FetchError> {
        table.validate().map_err(FetchError::ConfigError)?;

        let bq_table = self
            .client
            .table()
            .get(&table.database, &table.schema, &table.table, None)
            .await
            .map_err(|e| Self::classify_fetch_error(table, &e.to_string()))?;

        let fields = bq_table.schema.fields.unwrap_or_default();
        Ok(Self::schema_from_fields(&fields))
    }

    #[cfg(not(feature = "bigquery"))]
    async fn fetch_schema(&self, table: &TableIdentifier) -> Result<Schema, FetchError> {
        let _ = table;
        Err(FetchError::ConfigError(NOT_COMPILED.to_string()))
    }

    #[cfg(feature = "bigquery")]
    async fn alter_column_description(
        &self,
        table: &TableIdentifier,
        column: &str,
        description: &str,
    ) -> Result<(), MutationError> {
        table.validate().map_err(MutationError::MalformedRequest)?;
        crate::adapter::validate_identifier(column).map_err(MutationError::MalformedRequest)?;

        let request = Self::parameterized(
            Self::alter_statement(table, column),
            vec![Self::string_parameter("description", description)],
        );

        // Success is only reported once the DDL job has finished
        self.query_rows(request)
            .await
            .map(|_| ())
            .map_err(|message| Self::classify_mutation_error(&message))
    }

    #[cfg(not(feature = "bigquery"))]
    async fn alter_column_description(
        &self,
        table: &TableIdentifier,
        column: &str,
        _description: &str,
    ) -> Result<(), MutationError> {
        let _ = Self::alter_statement(table, column);
        Err(MutationError::TransientError(NOT_COMPILED.to_string()))
    }

    #[cfg(feature = "bigquery")]
    async fn test_connection(&self) -> Result<(), FetchError> {
        let request = QueryRequest::new("SELECT 1".to_string());

        self.run_query(request)
            .await
            .map_err(|e| FetchError::QueryError(format!("Connection test failed: {}", e)))?;

        Ok(())
    }

    #[cfg(not(feature = "bigquery"))]
    async fn test_connection(&self) -> Result<(), FetchError> {
        Err(FetchError::ConfigError(NOT_COMPILED.to_string()))
    }
}

#[async_trait::async_trait]
impl MetadataSource for BigQueryAdapter {
    #[cfg(feature = "bigquery")]
    async fn read_metadata(&self, table: &TableIdentifier) -> Result<Vec<MetadataRecord>, MetadataError> {
        table.validate().map_err(MetadataError::SourceUnavailable)?;

        let rows = self
            .query_rows(QueryRequest::new(Self::metadata_query(table)))
            .await
            .map_err(|e| MetadataError::SourceUnavailable(format!("{}: {}", table.fqn(), e)))?;

        Ok(rows
            .iter()
            .filter_map(|row| record_from_cells(&row_cells(row)))
            .collect())
    }

    #[cfg(not(feature = "bigquery"))]
    async fn read_metadata(&self, table: &TableIdentifier) -> Result<Vec<MetadataRecord>, MetadataError> {
        let _ = Self::metadata_query(table);
        Err(MetadataError::SourceUnavailable(NOT_COMPILED.to_string()))
    }
}

#[async_trait::async_trait]
impl AuditSink for BigQueryAdapter {
    #[cfg(feature = "bigquery")]
    async fn ensure_table(&self, table: &TableIdentifier) -> Result<(), SinkError> {
        table.validate().map_err(SinkError::TableSetup)?;

        match self
            .client
            .table()
            .get(&table.database, &table.schema, &table.table, None)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("Not found") || e.to_string().contains("notFound") => {
                tracing::info!(table = %table, "creating audit table");
                let schema = TableSchema::new(vec![
                    TableFieldSchema::string("job_run_id"),
                    TableFieldSchema::timestamp("timestamp"),
                    TableFieldSchema::string("status"),
                    TableFieldSchema::string("table_name"),
                    TableFieldSchema::string("column_name"),
                    TableFieldSchema::string("column_metadata"),
                    TableFieldSchema::string("target_dataset"),
                ]);

                self.client
                    .table()
                    .create(Table::new(&table.database, &table.schema, &table.table, schema))
                    .await
                    .map(|_| ())
                    .map_err(|e| SinkError::TableSetup(format!("{}: {}", table.fqn(), e)))
            }
            Err(e) => Err(SinkError::TableSetup(format!("{}: {}", table.fqn(), e))),
        }
    }

    #[cfg(not(feature = "bigquery"))]
    async fn ensure_table(&self, _table: &TableIdentifier) -> Result<(), SinkError> {
        Err(SinkError::TableSetup(NOT_COMPILED.to_string()))
    }

    #[cfg(feature = "bigquery")]
    async fn insert_rows(&self, table: &TableIdentifier, rows: &[AuditLogRow]) -> Result<(), SinkError> {
        let mut failed = 0usize;

        for (chunk_index, chunk) in rows.chunks(INSERT_CHUNK_SIZE).enumerate() {
            let mut request = TableDataInsertAllRequest::new();
            for (offset, row) in chunk.iter().enumerate() {
                // insertId lets BigQuery de-duplicate a retried request
                let insert_id = format!("{}-{}", row.job_run_id, chunk_index * INSERT_CHUNK_SIZE + offset);
                request
                    .add_row(Some(insert_id), row.clone())
                    .map_err(|e| SinkError::WriteFailure(e.to_string()))?;
            }

            let response = self
                .client
                .tabledata()
                .insert_all(&table.database, &table.schema, &table.table, request)
                .await
                .map_err(|e| SinkError::WriteFailure(format!("{}: {}", table.fqn(), e)))?;

            failed += response.insert_errors.map(|errors| errors.len()).unwrap_or(0);
        }

        if failed > 0 {
            return Err(SinkError::WriteFailure(format!(
                "{} of {} rows rejected by {}",
                failed,
                rows.len(),
                table.fqn()
            )));
        }

        Ok(())
    }

    #[cfg(not(feature = "bigquery"))]
    async fn insert_rows(&self, _table: &TableIdentifier, rows: &[AuditLogRow]) -> Result<(), SinkError> {
        let _ = (rows.len(), INSERT_CHUNK_SIZE);
        Err(SinkError::WriteFailure(NOT_COMPILED.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cells(values: &[Option<&str>]) -> Vec<Option<String>> {
        values.iter().map(|v| v.map(str::to_string)).collect()
    }

    #[test]
    fn test_warehouse_column_keeps_type_and_mode() {
        let column = warehouse_column("tags", "String", Some("REPEATED"), Some("Labels".to_string()));
        assert_eq!(column.data_type, "STRING");
        assert_eq!(column.mode, ColumnMode::Repeated);
        assert_eq!(column.description.as_deref(), Some("Labels"));

        let column = warehouse_column("id", "INT64", None, None);
        assert_eq!(column.mode, ColumnMode::Nullable);
        assert_eq!(column.description, None);
    }

    #[test]
    fn test_catalog_rows_decode_by_position() {
        let record = record_from_cells(&cells(&[Some("sales"), Some("orders"), Some("id"), Some("  Order id ")]));
        assert_eq!(record, Some(MetadataRecord::new("sales", "orders", "id", "Order id")));
    }

    #[test]
    fn test_catalog_rows_without_description_or_key_are_skipped() {
        assert_eq!(record_from_cells(&cells(&[Some("sales"), Some("orders"), Some("id"), Some("   ")])), None);
        assert_eq!(record_from_cells(&cells(&[Some("sales"), None, Some("id"), Some("Order id")])), None);
        // Short rows read missing cells as empty
        assert_eq!(record_from_cells(&cells(&[Some("sales"), Some("orders")])), None);
    }

    #[test]
    #[cfg(feature = "bigquery")]
    fn test_schema_from_table_fields() {
        let mut id = TableFieldSchema::integer("id");
        id.mode = Some("REQUIRED".to_string());
        id.description = Some("Order id".to_string());
        let fields = vec![id, TableFieldSchema::string("status")];

        let schema = BigQueryAdapter::schema_from_fields(&fields);
        assert_eq!(schema.columns.len(), 2);
        assert_eq!(schema.columns[0].name, "id");
        assert_eq!(schema.columns[0].mode, ColumnMode::Required);
        assert_eq!(schema.columns[0].description.as_deref(), Some("Order id"));
        assert_eq!(schema.columns[1].data_type, "STRING");
        assert_eq!(schema.columns[1].description, None);
    }

    #[test]
    fn test_statements_bind_values_as_parameters() {
        let table = TableIdentifier::new("proj", "sales", "orders");

        let alter = BigQueryAdapter::alter_statement(&table, "customer_id");
        assert_eq!(
            alter,
            "ALTER TABLE `proj.sales.orders` ALTER COLUMN `customer_id` SET OPTIONS (description = @description)"
        );

        let metadata = BigQueryAdapter::metadata_query(&TableIdentifier::new("proj", "gov", "metadata"));
        assert!(metadata.contains("FROM `proj.gov.metadata`"));
        assert!(metadata.contains("column_metadata IS NOT NULL"));
        let select_order: Vec<usize> = ["target_dataset_name", "table_name", "column_name", "column_metadata"]
            .iter()
            .filter_map(|name| metadata.find(name))
            .collect();
        assert_eq!(select_order.len(), 4);
        assert!(select_order.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_fetch_error_classification() {
        let table = TableIdentifier::new("proj", "sales", "orders");

        assert!(matches!(
            BigQueryAdapter::classify_fetch_error(&table, "Not found: Dataset proj:sales"),
            FetchError::TableNotFound(_)
        ));
        assert!(matches!(
            BigQueryAdapter::classify_fetch_error(&table, "Access Denied: Table proj:sales.orders"),
            FetchError::PermissionDenied(_)
        ));
        assert!(matches!(
            BigQueryAdapter::classify_fetch_error(&table, "connection reset by peer"),
            FetchError::QueryError(_)
        ));
    }

    #[test]
    fn test_mutation_error_classification() {
        assert!(matches!(
            BigQueryAdapter::classify_mutation_error("Response error: invalidQuery: Column x not found"),
            MutationError::MalformedRequest(_)
        ));
        assert!(matches!(
            BigQueryAdapter::classify_mutation_error("Exceeded rate limits: too many table update operations"),
            MutationError::TransientError(_)
        ));
    }

    #[tokio::test]
    #[cfg(not(feature = "bigquery"))]
    async fn test_constructors_fail_without_feature() {
        let result = BigQueryAdapter::connect("my-project", None).await;
        assert!(matches!(result, Err(FetchError::ConfigError(_))));
    }
}
