//! HTTP API Route Definitions

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};

use super::auth::{auth_middleware, AuthState};
use super::handlers::{self, AppState};

/// Create the API router with all routes
pub fn create_router(app_state: AppState, auth_state: AuthState) -> Router {
    // Probes stay open so load balancers and scrapers need no key
    let public = Router::new()
        .route("/api/v1/health", get(handlers::health))
        .route("/metrics", get(handlers::prometheus_metrics));

    let api_v1 = Router::new()
        .route("/jobs", post(handlers::create_job).get(handlers::list_jobs))
        .route("/jobs/:job_id", get(handlers::get_job))
        .route("/jobs/:job_id/cancel", post(handlers::cancel_job))
        .route("/jobs/:job_id/retry", post(handlers::retry_job))
        .route("/records", get(handlers::list_records))
        .route("/records/:record_id", get(handlers::get_record))
        .layer(middleware::from_fn_with_state(auth_state, auth_middleware));

    Router::new()
        .nest("/api/v1", api_v1)
        .merge(public)
        .layer(middleware::from_fn_with_state(app_state.clone(), count_requests))
        .with_state(app_state)
}

async fn count_requests(State(state): State<AppState>, request: Request<Body>, next: Next) -> Response {
    state.metrics.http_requests_total.inc();
    next.run(request).await
}
