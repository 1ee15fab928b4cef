//! HTTP API Request Handlers
//!
//! Handlers that map HTTP requests onto [`JobManager`] operations and
//! read-only store queries.

mod jobs;
mod records;
mod system;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;

use super::types::ErrorResponse;
use crate::daemon::jobs::{JobError, JobManager};
use crate::daemon::metrics::PipelineMetrics;

/// Largest page a list endpoint returns
const MAX_PAGE_SIZE: usize = 500;

/// Page size when the caller gives none
const DEFAULT_PAGE_SIZE: usize = 50;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<JobManager>,
    pub metrics: Arc<PipelineMetrics>,
    pub metrics_enabled: bool,
}

// Re-export all handlers
pub use jobs::{cancel_job, create_job, get_job, list_jobs, retry_job};
pub use records::{get_record, list_records};
pub use system::{health, prometheus_metrics};

/// Parse an id path segment, returning an error response on failure.
fn parse_id(raw: &str, what: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(raw).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::bad_request(format!("Invalid {} ID format", what))),
        )
            .into_response()
    })
}

fn clamp_limit(limit: Option<usize>) -> Option<usize> {
    Some(limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE))
}

/// Map a job error onto an HTTP status
fn job_error(err: JobError) -> Response {
    let (status, body) = match &err {
        JobError::NotFound(_) => (StatusCode::NOT_FOUND, ErrorResponse::not_found(err.to_string())),
        JobError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, ErrorResponse::bad_request(err.to_string())),
        JobError::InvalidTransition { .. } | JobError::StillStopping(_) => {
            (StatusCode::CONFLICT, ErrorResponse::conflict(err.to_string()))
        }
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorResponse::internal_error(err.to_string()),
        ),
    };
    (status, Json(body)).into_response()
}
