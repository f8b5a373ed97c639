//! API Module
//!
//! Read-only HTTP surface of the supervisor: liveness, pool status and
//! execution monitoring.

pub mod error;
pub mod execution;
pub mod health;

use axum::{Router, routing::get};
use sluice_store::ExecutionStore;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::supervisor::StatusBoard;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub status: StatusBoard,
    pub executions: Arc<dyn ExecutionStore>,
}

/// Create the status API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        .route("/status", get(health::engine_status))
        // Execution endpoints
        .route("/executions/{execution_id}", get(execution::get_execution))
        .route(
            "/executions/pipeline/{pipeline_id}",
            get(execution::list_executions_by_pipeline),
        )
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
