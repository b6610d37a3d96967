//! colsync HTTP server
//!
//! Exposes a reconciliation run over HTTP for schedulers and serverless
//! triggers. Runs execute in-process with the same engine as the CLI.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::ServerSettings;
pub use error::ApiError;
pub use routes::{create_router, RunRequest, RunResponse};
pub use state::{AppState, BigQueryConnector, SharedState, Warehouse, WarehouseConnector};
