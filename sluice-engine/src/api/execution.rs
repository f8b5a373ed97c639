//! Execution API Handlers
//!
//! Read-only monitoring of execution records.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use sluice_core::domain::execution::ExecutionRecord;
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

/// GET /executions/{execution_id}
/// Get an execution record by ID
pub async fn get_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<Uuid>,
) -> ApiResult<Json<ExecutionRecord>> {
    tracing::debug!("Getting execution: {}", execution_id);

    let record = state
        .executions
        .get(execution_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Execution {} not found", execution_id)))?;

    Ok(Json(record))
}

/// GET /executions/pipeline/{pipeline_id}?limit=N
/// List the most recent executions of a pipeline
pub async fn list_executions_by_pipeline(
    State(state): State<AppState>,
    Path(pipeline_id): Path<Uuid>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<ExecutionRecord>>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    if limit == 0 || limit > MAX_LIMIT {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_LIMIT
        )));
    }

    tracing::debug!("Listing executions for pipeline: {}", pipeline_id);

    let records = state
        .executions
        .list_by_pipeline(pipeline_id, limit)
        .await?;

    Ok(Json(records))
}
