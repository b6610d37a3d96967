//! Route definitions and handlers

use crate::error::ApiError;
use crate::state::SharedState;
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use colsync_core::{PartialConfig, RunSummary};
use colsync_engine::Reconciler;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Body of `POST /run`
#[derive(Debug, Clone, Deserialize)]
pub struct RunRequest {
    pub project_id: String,
    pub metadata_table: String,
    pub job_run_table: String,
    pub sleep_ms: Option<u64>,
    pub max_workers: Option<usize>,
}

/// Response of a completed run
#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub status: &'static str,

    /// Progress stream exactly as the CLI prints it
    pub stdout: String,

    pub summary: RunSummary,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Create the application router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/run", post(run_sync))
        .with_state(state)
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Run one reconciliation in-process and return its transcript
async fn run_sync(
    State(state): State<SharedState>,
    Json(request): Json<RunRequest>,
) -> Result<Json<RunResponse>, ApiError> {
    let config = PartialConfig {
        project_id: Some(request.project_id),
        metadata_table_ref: Some(request.metadata_table),
        audit_table_ref: Some(request.job_run_table),
        sleep_interval_ms: request.sleep_ms,
        worker_count: request.max_workers,
        enable_local_log: Some(state.settings.enable_local_log),
        credentials_path: state.settings.credentials_path.clone(),
    }
    .build()?;

    info!(project = %config.project_id, metadata = %config.metadata_table_ref, "run requested");

    let warehouse = state.connector.connect(&config).await?;
    let reconciler = Reconciler::new(config, warehouse.adapter, warehouse.source, warehouse.sink)
        .with_echo(false)
        .with_log_dir(state.settings.log_dir.clone());

    // The run owns its own task: a client that disconnects mid-run must not
    // abort it between an ALTER and the audit write.
    let shutdown = state.shutdown.clone();
    let report = tokio::spawn(async move { reconciler.run(shutdown).await })
        .await
        .map_err(|e| ApiError::Internal(format!("run task failed: {}", e)))??;

    info!(
        run_id = %report.summary.run_id,
        total = report.summary.stats.total(),
        "run finished"
    );

    Ok(Json(RunResponse {
        status: "success",
        stdout: report.stdout(),
        summary: report.summary,
    }))
}
