//! System handlers: health and metrics

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use super::AppState;
use crate::daemon::health::{self, HealthStatus};
use crate::daemon::http::types::ErrorResponse;

/// Aggregate health. Unhealthy answers 503 so health checkers can act on it.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = health::check(&state.manager, &state.metrics);
    let status = match report.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, Json(report))
}

/// Prometheus metrics endpoint
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    if !state.metrics_enabled {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::not_found("metrics are disabled")),
        )
            .into_response();
    }
    state.metrics.update_memory_usage();
    state.metrics.jobs_running.set(state.manager.active_count() as u64);
    state.metrics.queue_depth.set(state.manager.queued() as u64);
    let body = state.metrics.to_prometheus();
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}
