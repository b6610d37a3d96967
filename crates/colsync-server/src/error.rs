//! API error type and its JSON rendering

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use colsync_catalog::FetchError;
use colsync_core::ConfigError;
use colsync_engine::SyncError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Warehouse connection failed: {0}")]
    Connection(#[from] FetchError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ConfigError> for ApiError {
    fn from(e: ConfigError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

/// Body returned for every failed request
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub code: &'static str,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Sync(SyncError::Config(_)) | ApiError::Sync(SyncError::InvalidTableRef { .. }) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST")
            }
            ApiError::Connection(_) => (StatusCode::BAD_GATEWAY, "WAREHOUSE_UNAVAILABLE"),
            ApiError::Sync(SyncError::Metadata(_)) => (StatusCode::BAD_GATEWAY, "METADATA_UNAVAILABLE"),
            ApiError::Sync(SyncError::WorkerFailed(_)) | ApiError::Internal(_) => {
                error!("run aborted: {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };

        let body = ErrorResponse {
            status: "error",
            code,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
