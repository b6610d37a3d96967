//! In-memory adapter for testing
//!
//! `MockAdapter` plays all three collaborators at once: the warehouse, the
//! metadata catalog and the audit sink. It never touches the network and is
//! used for:
//! - Unit testing reconciliation logic
//! - Demos without real credentials
//! - Simulating error conditions per table, per column, or for the sink
//! - Pinning down timing: fetches can be held until released, or made to
//!   wait for each other so a test can prove they overlapped
//!
//! ## Usage
//!
//! ```rust,ignore
//! use colsync_catalog::{MockAdapterBuilder, WarehouseAdapter, TableIdentifier};
//! use colsync_core::{Schema, Column};
//!
//! let adapter = MockAdapterBuilder::new()
//!     .with_schema("proj", "sales", "orders", Schema::from_columns(vec![
//!         Column::new("id", "INT64").with_description("Order id"),
//!     ]))
//!     .with_latency(20)
//!     .build();
//!
//! let table = TableIdentifier::new("proj", "sales", "orders");
//! adapter.alter_column_description(&table, "id", "Primary key").await?;
//! assert_eq!(adapter.alter_calls().await.len(), 1);
//! ```
//!
//! Mutations are applied to the stored schema, so a second run against the
//! same adapter observes the first run's updates.

use crate::adapter::{
    AuditSink, FetchError, MetadataError, MetadataSource, MutationError, SinkError,
    TableIdentifier, WarehouseAdapter,
};
use colsync_core::{AuditLogRow, MetadataRecord, Schema};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Barrier, RwLock, Semaphore};

/// A recorded `alter_column_description` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlterCall {
    pub table: String,
    pub column: String,
    pub description: String,
}

/// Shared call counters
#[derive(Debug, Default)]
struct Counters {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Counters {
    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Mock adapter for testing
///
/// Clones share state, so a clone handed to the engine can be inspected
/// afterwards through the original.
#[derive(Clone)]
pub struct MockAdapter {
    /// Live schemas by table FQN
    schemas: Arc<RwLock<HashMap<String, Schema>>>,

    /// Errors to return from `fetch_schema` for specific tables
    errors: Arc<RwLock<HashMap<String, FetchError>>>,

    /// Errors to return from `alter_column_description`, keyed by `fqn.column` (lower case)
    mutation_errors: Arc<RwLock<HashMap<String, MutationError>>>,

    /// Catalog rows served by `read_metadata`
    metadata: Arc<RwLock<Vec<MetadataRecord>>>,

    /// Error served instead of the catalog rows
    metadata_error: Option<MetadataError>,

    /// Rows accepted by `insert_rows`
    audit_rows: Arc<RwLock<Vec<AuditLogRow>>>,

    /// Reject every `insert_rows` call
    fail_sink: bool,

    /// Number of schema fetches per table FQN
    fetch_calls: Arc<RwLock<HashMap<String, usize>>>,

    /// Every mutation attempted, in call order
    alter_calls: Arc<RwLock<Vec<AlterCall>>>,

    counters: Arc<Counters>,

    /// Number of `fetch_schema` calls that have started
    fetches_started: Arc<watch::Sender<usize>>,

    /// Fetches wait here for a permit from `release_fetches`
    fetch_gate: Option<Arc<Semaphore>>,

    /// Fetches proceed only in batches of this barrier's size
    fetch_rendezvous: Option<Arc<Barrier>>,

    /// Simulate connection failure
    fail_connection: bool,

    /// Simulate query latency (milliseconds)
    latency_ms: u64,

    /// Name to return from name() method
    adapter_name: &'static str,
}

impl MockAdapter {
    /// Create a new mock adapter with no predefined schemas
    pub fn new() -> Self {
        MockAdapterBuilder::new().build()
    }

    /// Add a schema for a specific table
    pub async fn add_schema(&self, table: TableIdentifier, schema: Schema) {
        self.schemas.write().await.insert(table.fqn(), schema);
    }

    /// Configure an error to be returned when fetching a specific table
    pub async fn add_error_for_table(&self, table: TableIdentifier, error: FetchError) {
        self.errors.write().await.insert(table.fqn(), error);
    }

    /// Configure an error to be returned when altering a specific column
    pub async fn add_mutation_error(&self, table: TableIdentifier, column: &str, error: MutationError) {
        self.mutation_errors
            .write()
            .await
            .insert(mutation_key(&table.fqn(), column), error);
    }

    /// Replace the catalog rows
    pub async fn set_metadata(&self, records: Vec<MetadataRecord>) {
        *self.metadata.write().await = records;
    }

    /// Configure to fail all connection tests
    pub fn with_connection_failure(mut self) -> Self {
        self.fail_connection = true;
        self
    }

    /// Configure simulated latency for all operations
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Set a custom adapter name
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.adapter_name = name;
        self
    }

    /// Current schema of a table
    pub async fn schema(&self, table: &TableIdentifier) -> Option<Schema> {
        self.schemas.read().await.get(&table.fqn()).cloned()
    }

    /// Rows written to the audit sink so far
    pub async fn audit_rows(&self) -> Vec<AuditLogRow> {
        self.audit_rows.read().await.clone()
    }

    /// Every mutation attempted so far
    pub async fn alter_calls(&self) -> Vec<AlterCall> {
        self.alter_calls.read().await.clone()
    }

    /// Number of schema fetches for a table
    pub async fn fetch_count(&self, table: &TableIdentifier) -> usize {
        self.fetch_calls.read().await.get(&table.fqn()).copied().unwrap_or(0)
    }

    /// Highest number of warehouse calls ever in flight at once
    pub fn peak_concurrency(&self) -> usize {
        self.counters.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Number of schema fetches that have started, including held ones
    pub fn fetches_started(&self) -> usize {
        *self.fetches_started.borrow()
    }

    /// Wait until at least `count` schema fetches have started
    pub async fn wait_for_fetches(&self, count: usize) {
        let mut started = self.fetches_started.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel
        let _ = started.wait_for(|n| *n >= count).await;
    }

    /// Let `count` held fetches continue (no-op unless fetches are held)
    pub fn release_fetches(&self, count: usize) {
        if let Some(gate) = &self.fetch_gate {
            gate.add_permits(count);
        }
    }

    /// Simulate latency if configured
    async fn simulate_latency(&self) {
        if self.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;
        }
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn mutation_key(fqn: &str, column: &str) -> String {
    format!("{}.{}", fqn, column).to_lowercase()
}

#[async_trait::async_trait]
impl WarehouseAdapter for MockAdapter {
    fn name(&self) -> &'static str {
        self.adapter_name
    }

    async fn fetch_schema(&self, table: &TableIdentifier) -> Result<Schema, FetchError> {
        self.counters.enter();
        self.fetches_started.send_modify(|n| *n += 1);
        if let Some(rendezvous) = &self.fetch_rendezvous {
            rendezvous.wait().await;
        }
        if let Some(gate) = &self.fetch_gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.simulate_latency().await;
        self.counters.exit();

        *self.fetch_calls.write().await.entry(table.fqn()).or_insert(0) += 1;

        // Check for configured errors first
        if let Some(error) = self.errors.read().await.get(&table.fqn()) {
            return Err(error.clone());
        }

        self.schemas
            .read()
            .await
            .get(&table.fqn())
            .cloned()
            .ok_or_else(|| FetchError::TableNotFound(table.fqn()))
    }

    async fn alter_column_description(
        &self,
        table: &TableIdentifier,
        column: &str,
        description: &str,
    ) -> Result<(), MutationError> {
        self.counters.enter();
        self.simulate_latency().await;
        self.counters.exit();

        self.alter_calls.write().await.push(AlterCall {
            table: table.fqn(),
            column: column.to_string(),
            description: description.to_string(),
        });

        if let Some(error) = self
            .mutation_errors
            .read()
            .await
            .get(&mutation_key(&table.fqn(), column))
        {
            return Err(error.clone());
        }

        let mut schemas = self.schemas.write().await;
        let target = schemas
            .get_mut(&table.fqn())
            .and_then(|schema| {
                schema
                    .columns
                    .iter_mut()
                    .find(|c| c.name.eq_ignore_ascii_case(column))
            })
            .ok_or_else(|| {
                MutationError::MalformedRequest(format!("Column {} not found in {}", column, table.fqn()))
            })?;

        target.description = Some(description.to_string());
        Ok(())
    }

    async fn test_connection(&self) -> Result<(), FetchError> {
        self.simulate_latency().await;

        if self.fail_connection {
            Err(FetchError::NetworkError(
                "Simulated connection failure".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl MetadataSource for MockAdapter {
    async fn read_metadata(&self, _table: &TableIdentifier) -> Result<Vec<MetadataRecord>, MetadataError> {
        self.simulate_latency().await;

        if let Some(error) = &self.metadata_error {
            return Err(error.clone());
        }

        Ok(self
            .metadata
            .read()
            .await
            .iter()
            .filter(|r| !r.description.is_empty())
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl AuditSink for MockAdapter {
    async fn ensure_table(&self, _table: &TableIdentifier) -> Result<(), SinkError> {
        Ok(())
    }

    async fn insert_rows(&self, table: &TableIdentifier, rows: &[AuditLogRow]) -> Result<(), SinkError> {
        if self.fail_sink {
            return Err(SinkError::WriteFailure(format!(
                "Simulated insert failure for {}",
                table.fqn()
            )));
        }

        self.audit_rows.write().await.extend_from_slice(rows);
        Ok(())
    }
}

/// Builder for creating MockAdapter with multiple schemas
///
/// # Example
///
/// ```rust,ignore
/// let adapter = MockAdapterBuilder::new()
///     .with_schema("proj", "sales", "orders", orders_schema())
///     .with_error("proj", "sales", "locked", FetchError::PermissionDenied("no".into()))
///     .with_metadata(records)
///     .with_sink_failure()
///     .build();
/// ```
pub struct MockAdapterBuilder {
    schemas: HashMap<String, Schema>,
    errors: HashMap<String, FetchError>,
    mutation_errors: HashMap<String, MutationError>,
    metadata: Vec<MetadataRecord>,
    metadata_error: Option<MetadataError>,
    fail_sink: bool,
    fail_connection: bool,
    latency_ms: u64,
    hold_fetches: bool,
    fetch_rendezvous: Option<usize>,
    adapter_name: &'static str,
}

impl MockAdapterBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            schemas: HashMap::new(),
            errors: HashMap::new(),
            mutation_errors: HashMap::new(),
            metadata: Vec::new(),
            metadata_error: None,
            fail_sink: false,
            fail_connection: false,
            latency_ms: 0,
            hold_fetches: false,
            fetch_rendezvous: None,
            adapter_name: "Mock",
        }
    }

    /// Add a schema for a table
    pub fn with_schema(mut self, database: &str, dataset: &str, table: &str, schema: Schema) -> Self {
        self.schemas.insert(TableIdentifier::new(database, dataset, table).fqn(), schema);
        self
    }

    /// Add a fetch error for a specific table
    pub fn with_error(mut self, database: &str, dataset: &str, table: &str, error: FetchError) -> Self {
        self.errors.insert(TableIdentifier::new(database, dataset, table).fqn(), error);
        self
    }

    /// Add a mutation error for a specific column
    pub fn with_mutation_error(
        mut self,
        database: &str,
        dataset: &str,
        table: &str,
        column: &str,
        error: MutationError,
    ) -> Self {
        let fqn = TableIdentifier::new(database, dataset, table).fqn();
        self.mutation_errors.insert(mutation_key(&fqn, column), error);
        self
    }

    /// Set the catalog rows
    pub fn with_metadata(mut self, records: Vec<MetadataRecord>) -> Self {
        self.metadata = records;
        self
    }

    /// Make the catalog unreadable
    pub fn with_metadata_error(mut self, error: MetadataError) -> Self {
        self.metadata_error = Some(error);
        self
    }

    /// Reject audit inserts
    pub fn with_sink_failure(mut self) -> Self {
        self.fail_sink = true;
        self
    }

    /// Configure connection failure
    pub fn with_connection_failure(mut self) -> Self {
        self.fail_connection = true;
        self
    }

    /// Configure latency
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Hold every schema fetch until `MockAdapter::release_fetches`
    pub fn with_held_fetches(mut self) -> Self {
        self.hold_fetches = true;
        self
    }

    /// Make schema fetches wait until `parties` of them are in flight together
    pub fn with_fetch_rendezvous(mut self, parties: usize) -> Self {
        self.fetch_rendezvous = Some(parties);
        self
    }

    /// Set adapter name
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.adapter_name = name;
        self
    }

    /// Build the MockAdapter
    pub fn build(self) -> MockAdapter {
        MockAdapter {
            schemas: Arc::new(RwLock::new(self.schemas)),
            errors: Arc::new(RwLock::new(self.errors)),
            mutation_errors: Arc::new(RwLock::new(self.mutation_errors)),
            metadata: Arc::new(RwLock::new(self.metadata)),
            metadata_error: self.metadata_error,
            audit_rows: Arc::new(RwLock::new(Vec::new())),
            fail_sink: self.fail_sink,
            fetch_calls: Arc::new(RwLock::new(HashMap::new())),
            alter_calls: Arc::new(RwLock::new(Vec::new())),
            counters: Arc::new(Counters::default()),
            fetches_started: Arc::new(watch::channel(0).0),
            fetch_gate: self.hold_fetches.then(|| Arc::new(Semaphore::new(0))),
            fetch_rendezvous: self.fetch_rendezvous.map(|parties| Arc::new(Barrier::new(parties))),
            fail_connection: self.fail_connection,
            latency_ms: self.latency_ms,
            adapter_name: self.adapter_name,
        }
    }
}

impl Default for MockAdapterBuilder {
    fn default() -> Self {
        Self::new()
    }
}
