//! Mutation executor: applies one description change to the warehouse

use colsync_catalog::{validate_identifier, MutationError, TableIdentifier, WarehouseAdapter};
use colsync_core::ReconciliationAction;
use std::sync::Arc;
use std::time::Duration;

/// Applies planned updates and enforces the pause after each one
#[derive(Clone)]
pub struct MutationExecutor {
    warehouse: Arc<dyn WarehouseAdapter>,
    sleep_interval: Duration,
}

impl MutationExecutor {
    pub fn new(warehouse: Arc<dyn WarehouseAdapter>, sleep_interval: Duration) -> Self {
        Self {
            warehouse,
            sleep_interval,
        }
    }

    /// Set `column`'s description and classify the result
    ///
    /// Failures never propagate: they become [`ReconciliationAction::Error`]
    /// with the cause attached. The post-mutation pause only follows a
    /// successful change.
    pub async fn apply(
        &self,
        table: &TableIdentifier,
        column: &str,
        description: &str,
    ) -> ReconciliationAction {
        if let Err(reason) = validate_identifier(column) {
            let error = MutationError::MalformedRequest(reason);
            tracing::warn!(table = %table, column, "{}", error);
            return ReconciliationAction::Error(error.to_string());
        }

        match self
            .warehouse
            .alter_column_description(table, column, description)
            .await
        {
            Ok(()) => {
                tracing::debug!(table = %table, column, "description updated");
                if !self.sleep_interval.is_zero() {
                    tokio::time::sleep(self.sleep_interval).await;
                }
                ReconciliationAction::Updated
            }
            Err(error) => {
                match &error {
                    MutationError::MalformedRequest(_) => {
                        tracing::warn!(table = %table, column, "rejected: {}", error)
                    }
                    MutationError::TransientError(_) => {
                        tracing::warn!(table = %table, column, "not applied: {}", error)
                    }
                }
                ReconciliationAction::Error(error.to_string())
            }
        }
    }
}
