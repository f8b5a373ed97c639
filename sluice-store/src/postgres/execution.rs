//! Execution collection
//!
//! Handles all database operations related to execution records. The event
//! log is a JSONB array that is only ever appended to.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sluice_core::domain::execution::{ExecutionEvent, ExecutionRecord, ExecutionStatus};
use sluice_core::domain::task::ContentProcessingTask;
use uuid::Uuid;

use super::PgStore;
use crate::error::{StoreError, StoreResult};
use crate::execution::ExecutionStore;

const EXECUTION_COLUMNS: &str = "execution_id, task_id, pipeline_id, content_id, status, attempt, \
                                 worker_id, created_at, updated_at, error, events";

const TERMINAL_STATUSES: &str = "'Completed', 'Failed', 'Cancelled'";

#[async_trait]
impl ExecutionStore for PgStore {
    async fn start_attempt(
        &self,
        task: &ContentProcessingTask,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<ExecutionRecord> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {} FROM executions WHERE execution_id = $1 FOR UPDATE",
            EXECUTION_COLUMNS
        ))
        .bind(task.execution_id)
        .fetch_optional(&mut *tx)
        .await?
        .map(ExecutionRecord::try_from)
        .transpose()?;

        if let Some(record) = existing.as_ref().filter(|r| r.status.is_terminal()) {
            tx.commit().await?;
            return Ok(record.clone());
        }

        let attempt = existing.map_or(0, |r| r.attempt).max(task.attempt_count) + 1;
        let event = serde_json::to_value(ExecutionEvent::new(
            now,
            ExecutionStatus::Running,
            Some(format!("attempt {} started on {}", attempt, worker_id)),
        ))?;

        // A concurrent first insert is resolved by the conflict arm
        let row = sqlx::query_as::<_, ExecutionRow>(&format!(
            r#"
            INSERT INTO executions (execution_id, task_id, pipeline_id, content_id, status,
                                    attempt, worker_id, created_at, updated_at, events)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8, jsonb_build_array($9::jsonb))
            ON CONFLICT (execution_id) DO UPDATE
            SET status = EXCLUDED.status,
                attempt = GREATEST(executions.attempt + 1, EXCLUDED.attempt),
                worker_id = EXCLUDED.worker_id,
                updated_at = EXCLUDED.updated_at,
                events = executions.events || $9::jsonb
            WHERE executions.status NOT IN ({})
            RETURNING {}
            "#,
            TERMINAL_STATUSES, EXECUTION_COLUMNS
        ))
        .bind(task.execution_id)
        .bind(task.task_id)
        .bind(task.pipeline_id)
        .bind(&task.content_id)
        .bind(ExecutionStatus::Running.as_str())
        .bind(attempt as i32)
        .bind(worker_id)
        .bind(now)
        .bind(event)
        .fetch_optional(&mut *tx)
        .await?;

        let row = match row {
            Some(row) => row,
            None => {
                sqlx::query_as::<_, ExecutionRow>(&format!(
                    "SELECT {} FROM executions WHERE execution_id = $1",
                    EXECUTION_COLUMNS
                ))
                .bind(task.execution_id)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        tx.commit().await?;
        ExecutionRecord::try_from(row)
    }

    async fn update_status(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let error = if status == ExecutionStatus::Failed {
            message.clone()
        } else {
            None
        };
        let event = serde_json::to_value(ExecutionEvent::new(now, status, message))?;

        let result = sqlx::query(&format!(
            r#"
            UPDATE executions
            SET status = $2, updated_at = $3, error = COALESCE($4, error),
                events = events || $5::jsonb
            WHERE execution_id = $1 AND status NOT IN ({})
            "#,
            TERMINAL_STATUSES
        ))
        .bind(execution_id)
        .bind(status.as_str())
        .bind(now)
        .bind(error)
        .bind(event)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        let exists = sqlx::query_scalar::<_, i32>("SELECT 1 FROM executions WHERE execution_id = $1")
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await?;

        match exists {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(format!("execution {}", execution_id))),
        }
    }

    async fn get(&self, execution_id: Uuid) -> StoreResult<Option<ExecutionRecord>> {
        let row = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {} FROM executions WHERE execution_id = $1",
            EXECUTION_COLUMNS
        ))
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ExecutionRecord::try_from).transpose()
    }

    async fn list_by_pipeline(
        &self,
        pipeline_id: Uuid,
        limit: usize,
    ) -> StoreResult<Vec<ExecutionRecord>> {
        let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {} FROM executions WHERE pipeline_id = $1 ORDER BY created_at DESC LIMIT $2",
            EXECUTION_COLUMNS
        ))
        .bind(pipeline_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ExecutionRecord::try_from).collect()
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ExecutionRow {
    execution_id: Uuid,
    task_id: Uuid,
    pipeline_id: Uuid,
    content_id: String,
    status: String,
    attempt: i32,
    worker_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    error: Option<String>,
    events: serde_json::Value,
}

impl TryFrom<ExecutionRow> for ExecutionRecord {
    type Error = StoreError;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        let status = ExecutionStatus::parse(&row.status).unwrap_or(ExecutionStatus::Pending);
        let events: Vec<ExecutionEvent> = serde_json::from_value(row.events)?;

        Ok(ExecutionRecord {
            execution_id: row.execution_id,
            task_id: row.task_id,
            pipeline_id: row.pipeline_id,
            content_id: row.content_id,
            status,
            attempt: row.attempt.max(0) as u32,
            worker_id: row.worker_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            error: row.error,
            events,
        })
    }
}
