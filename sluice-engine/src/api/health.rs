//! Health and Status API Handlers
//!
//! Liveness check and the supervisor's pool status.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use sluice_core::dto::status::EngineStatus;

use crate::api::AppState;

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /status
/// Per-pool configured and active counts with per-worker liveness
pub async fn engine_status(State(state): State<AppState>) -> Json<EngineStatus> {
    Json(state.status.snapshot())
}
