//! Record handlers (read-only)

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use super::{clamp_limit, parse_id, AppState};
use crate::daemon::http::types::*;
use crate::store::RecordFilter;

/// List records, oldest first
pub async fn list_records(
    State(state): State<AppState>,
    Query(mut filter): Query<RecordFilter>,
) -> impl IntoResponse {
    filter.limit = clamp_limit(filter.limit);
    let records = state.manager.store().records.list(&filter);
    Json(RecordListResponse {
        count: records.len(),
        records,
    })
}

/// One record
pub async fn get_record(State(state): State<AppState>, Path(record_id): Path<String>) -> impl IntoResponse {
    let id = match parse_id(&record_id, "record") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.manager.store().records.get(&id) {
        Some(record) => Json(record).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::not_found(format!("record {} not found", id))),
        )
            .into_response(),
    }
}
