//! Job handlers: create, get, cancel, retry, list

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use tracing::debug;

use super::{clamp_limit, job_error, parse_id, AppState};
use crate::daemon::http::types::*;
use crate::store::JobFilter;
use crate::types::JobRequest;

/// Enqueue a scraping job
pub async fn create_job(State(state): State<AppState>, Json(request): Json<JobRequest>) -> impl IntoResponse {
    debug!("HTTP job request: {} ({:?})", request.source_url, request.priority);
    match state.manager.enqueue(request) {
        Ok(job_id) => (
            StatusCode::CREATED,
            Json(JobCreatedResponse {
                job_id,
                status: crate::types::JobStatus::Pending,
            }),
        )
            .into_response(),
        Err(e) => job_error(e),
    }
}

/// Job snapshot
pub async fn get_job(State(state): State<AppState>, Path(job_id): Path<String>) -> impl IntoResponse {
    let id = match parse_id(&job_id, "job") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.manager.status(&id) {
        Ok(job) => Json(job).into_response(),
        Err(e) => job_error(e),
    }
}

/// Cancel a pending or running job
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<CancelQuery>,
) -> impl IntoResponse {
    let id = match parse_id(&job_id, "job") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.manager.cancel(&id, query.reason) {
        Ok(job) => Json(job).into_response(),
        Err(e) => job_error(e),
    }
}

/// Requeue a failed or cancelled job
pub async fn retry_job(State(state): State<AppState>, Path(job_id): Path<String>) -> impl IntoResponse {
    let id = match parse_id(&job_id, "job") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.manager.retry(&id) {
        Ok(job) => Json(job).into_response(),
        Err(e) => job_error(e),
    }
}

/// List jobs, newest first
pub async fn list_jobs(State(state): State<AppState>, Query(mut filter): Query<JobFilter>) -> impl IntoResponse {
    filter.limit = clamp_limit(filter.limit);
    let jobs = state.manager.list(&filter);
    Json(JobListResponse {
        count: jobs.len(),
        jobs,
    })
}
