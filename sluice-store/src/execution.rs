//! Execution store
//!
//! Status and event log of each processed task, written by processing
//! workers and read by monitoring consumers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sluice_core::domain::execution::{ExecutionRecord, ExecutionStatus};
use sluice_core::domain::task::ContentProcessingTask;
use uuid::Uuid;

use crate::error::StoreResult;

/// Store trait for execution records
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Creates or updates the task's record to `Running`
    ///
    /// The attempt number is one past the larger of the record's last started
    /// attempt and `task.attempt_count`, so only attempts that actually
    /// started are counted. A `Running` event is appended either way.
    ///
    /// A record that is already terminal is returned unchanged.
    async fn start_attempt(
        &self,
        task: &ContentProcessingTask,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<ExecutionRecord>;

    /// Sets the record's status and appends an event
    ///
    /// For `Failed` the message is also stored as the record's error.
    /// Returns false, leaving the record untouched, when it is already
    /// terminal.
    async fn update_status(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Finds a record by execution ID
    async fn get(&self, execution_id: Uuid) -> StoreResult<Option<ExecutionRecord>>;

    /// Lists the most recent records of a pipeline, newest first
    async fn list_by_pipeline(
        &self,
        pipeline_id: Uuid,
        limit: usize,
    ) -> StoreResult<Vec<ExecutionRecord>>;
}
