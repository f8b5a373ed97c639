//! Schedule store
//!
//! Persisted next-due-time bookkeeping, one record per pipeline. Writes that
//! follow a discovery run are fenced by the pipeline's lease.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sluice_core::domain::schedule::ScheduleRecord;
use uuid::Uuid;

use crate::error::StoreResult;

/// Store trait for schedule records
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Creates the record for `pipeline_id` (due at `now`) if missing,
    /// otherwise refreshes its polling interval without moving `next_due_at`
    async fn ensure(
        &self,
        pipeline_id: Uuid,
        polling_interval_secs: u64,
        now: DateTime<Utc>,
    ) -> StoreResult<ScheduleRecord>;

    /// Reads the record for `pipeline_id`
    async fn get(&self, pipeline_id: Uuid) -> StoreResult<Option<ScheduleRecord>>;

    /// Lists every record
    async fn list(&self) -> StoreResult<Vec<ScheduleRecord>>;

    /// Lists records with `next_due_at <= now`, oldest first
    async fn list_due(&self, now: DateTime<Utc>) -> StoreResult<Vec<ScheduleRecord>>;

    /// Records a completed discovery run and advances `next_due_at`
    ///
    /// Applies only if the lock named after the pipeline still carries
    /// `fencing_token` and is unexpired at `now`. Returns `false` when the
    /// write was rejected as stale.
    async fn record_success(
        &self,
        pipeline_id: Uuid,
        fencing_token: i64,
        ran_at: DateTime<Utc>,
        next_due_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Records a failed discovery run; `next_due_at` is left unchanged
    ///
    /// Fenced like [`ScheduleStore::record_success`].
    async fn record_failure(
        &self,
        pipeline_id: Uuid,
        fencing_token: i64,
        ran_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;
}

/// Name of the lock guarding a pipeline's schedule
pub fn lock_name(pipeline_id: Uuid) -> String {
    pipeline_id.to_string()
}
