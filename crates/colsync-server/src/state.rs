//! Shared application state

use crate::config::ServerSettings;
use colsync_catalog::{AuditSink, BigQueryAdapter, FetchError, MetadataSource, WarehouseAdapter};
use colsync_core::SyncConfig;
use std::sync::Arc;
use tokio::sync::watch;

/// The three collaborators a run needs, usually one adapter behind all of them
#[derive(Clone)]
pub struct Warehouse {
    pub adapter: Arc<dyn WarehouseAdapter>,
    pub source: Arc<dyn MetadataSource>,
    pub sink: Arc<dyn AuditSink>,
}

impl Warehouse {
    pub fn from_adapter<A>(adapter: A) -> Self
    where
        A: WarehouseAdapter + MetadataSource + AuditSink + 'static,
    {
        let adapter = Arc::new(adapter);
        Self {
            adapter: adapter.clone(),
            source: adapter.clone(),
            sink: adapter,
        }
    }
}

/// Opens a verified warehouse connection for one run
#[async_trait::async_trait]
pub trait WarehouseConnector: Send + Sync {
    async fn connect(&self, config: &SyncConfig) -> Result<Warehouse, FetchError>;
}

/// Connects to BigQuery with the run's project and the server's credentials
pub struct BigQueryConnector;

#[async_trait::async_trait]
impl WarehouseConnector for BigQueryConnector {
    async fn connect(&self, config: &SyncConfig) -> Result<Warehouse, FetchError> {
        let adapter =
            BigQueryAdapter::connect(&config.project_id, config.credentials_path.as_deref()).await?;
        adapter.test_connection().await?;
        Ok(Warehouse::from_adapter(adapter))
    }
}

pub struct AppState {
    pub connector: Arc<dyn WarehouseConnector>,
    pub settings: ServerSettings,

    /// Flips to true when the server is shutting down
    pub shutdown: watch::Receiver<bool>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        connector: Arc<dyn WarehouseConnector>,
        settings: ServerSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            connector,
            settings,
            shutdown,
        }
    }
}
