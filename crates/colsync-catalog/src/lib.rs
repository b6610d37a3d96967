//! Warehouse collaborators for column-description reconciliation
//!
//! This crate provides the three external collaborators the engine talks to:
//! - [`WarehouseAdapter`]: read a table schema, alter a column description
//! - [`MetadataSource`]: read the governance catalog
//! - [`AuditSink`]: persist job-run audit rows
//!
//! ## Features
//!
//! - `bigquery` - Google BigQuery support via `gcp-bigquery-client`
//!
//! ## Example
//!
//! ```rust,ignore
//! use colsync_catalog::{BigQueryAdapter, WarehouseAdapter, TableIdentifier};
//!
//! let adapter = BigQueryAdapter::with_adc("my-project").await?;
//! let table = TableIdentifier::new("my-project", "my_dataset", "my_table");
//! let schema = adapter.fetch_schema(&table).await?;
//! ```

pub mod adapter;
pub mod bigquery;
pub mod mock;

pub use adapter::{
    validate_identifier, AuditSink, FetchError, MetadataError, MetadataSource, MutationError,
    SinkError, TableIdentifier, WarehouseAdapter,
};
pub use bigquery::BigQueryAdapter;
pub use mock::{AlterCall, MockAdapter, MockAdapterBuilder};
