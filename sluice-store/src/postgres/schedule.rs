//! Schedule collection
//!
//! Post-run writes join against the lock row so a stale lease holder can
//! never advance or annotate the schedule.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sluice_core::domain::schedule::{RunOutcome, ScheduleRecord};
use uuid::Uuid;

use super::PgStore;
use crate::error::StoreResult;
use crate::schedule::{ScheduleStore, lock_name};

const SCHEDULE_COLUMNS: &str = "pipeline_id, polling_interval_secs, next_due_at, last_run_at, \
                                last_run_outcome, last_error, fencing_token";

#[async_trait]
impl ScheduleStore for PgStore {
    async fn ensure(
        &self,
        pipeline_id: Uuid,
        polling_interval_secs: u64,
        now: DateTime<Utc>,
    ) -> StoreResult<ScheduleRecord> {
        let row = sqlx::query_as::<_, ScheduleRow>(&format!(
            r#"
            INSERT INTO schedules (pipeline_id, polling_interval_secs, next_due_at, fencing_token)
            VALUES ($1, $2, $3, 0)
            ON CONFLICT (pipeline_id) DO UPDATE
            SET polling_interval_secs = EXCLUDED.polling_interval_secs
            RETURNING {}
            "#,
            SCHEDULE_COLUMNS
        ))
        .bind(pipeline_id)
        .bind(polling_interval_secs as i64)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn get(&self, pipeline_id: Uuid) -> StoreResult<Option<ScheduleRecord>> {
        let row = sqlx::query_as::<_, ScheduleRow>(&format!(
            "SELECT {} FROM schedules WHERE pipeline_id = $1",
            SCHEDULE_COLUMNS
        ))
        .bind(pipeline_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn list(&self) -> StoreResult<Vec<ScheduleRecord>> {
        let rows = sqlx::query_as::<_, ScheduleRow>(&format!(
            "SELECT {} FROM schedules ORDER BY next_due_at ASC",
            SCHEDULE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn list_due(&self, now: DateTime<Utc>) -> StoreResult<Vec<ScheduleRecord>> {
        let rows = sqlx::query_as::<_, ScheduleRow>(&format!(
            "SELECT {} FROM schedules WHERE next_due_at <= $1 ORDER BY next_due_at ASC",
            SCHEDULE_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn record_success(
        &self,
        pipeline_id: Uuid,
        fencing_token: i64,
        ran_at: DateTime<Utc>,
        next_due_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE schedules s
            SET next_due_at = $3, last_run_at = $4, last_run_outcome = $5,
                last_error = NULL, fencing_token = $2
            FROM locks l
            WHERE s.pipeline_id = $1
              AND l.name = $6
              AND l.fencing_token = $2
              AND l.expires_at > $7
            "#,
        )
        .bind(pipeline_id)
        .bind(fencing_token)
        .bind(next_due_at)
        .bind(ran_at)
        .bind(outcome_to_string(RunOutcome::Success))
        .bind(lock_name(pipeline_id))
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_failure(
        &self,
        pipeline_id: Uuid,
        fencing_token: i64,
        ran_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE schedules s
            SET last_run_at = $3, last_run_outcome = $4, last_error = $5, fencing_token = $2
            FROM locks l
            WHERE s.pipeline_id = $1
              AND l.name = $6
              AND l.fencing_token = $2
              AND l.expires_at > $7
            "#,
        )
        .bind(pipeline_id)
        .bind(fencing_token)
        .bind(ran_at)
        .bind(outcome_to_string(RunOutcome::Failed))
        .bind(error)
        .bind(lock_name(pipeline_id))
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn outcome_to_string(outcome: RunOutcome) -> &'static str {
    match outcome {
        RunOutcome::Success => "Success",
        RunOutcome::Failed => "Failed",
    }
}

fn string_to_outcome(s: &str) -> Option<RunOutcome> {
    match s {
        "Success" => Some(RunOutcome::Success),
        "Failed" => Some(RunOutcome::Failed),
        _ => None,
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ScheduleRow {
    pipeline_id: Uuid,
    polling_interval_secs: i64,
    next_due_at: DateTime<Utc>,
    last_run_at: Option<DateTime<Utc>>,
    last_run_outcome: Option<String>,
    last_error: Option<String>,
    fencing_token: i64,
}

impl From<ScheduleRow> for ScheduleRecord {
    fn from(row: ScheduleRow) -> Self {
        ScheduleRecord {
            pipeline_id: row.pipeline_id,
            polling_interval_secs: row.polling_interval_secs.max(0) as u64,
            next_due_at: row.next_due_at,
            last_run_at: row.last_run_at,
            last_run_outcome: row.last_run_outcome.as_deref().and_then(string_to_outcome),
            last_error: row.last_error,
            fencing_token: row.fencing_token,
        }
    }
}
