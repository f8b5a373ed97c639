//! In-memory document store
//!
//! All collections live behind one mutex so that fenced writes check the
//! lock and update the schedule atomically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sluice_core::domain::execution::{ExecutionEvent, ExecutionRecord, ExecutionStatus};
use sluice_core::domain::lock::{AcquireOutcome, Lease, LockRecord, RenewOutcome};
use sluice_core::domain::pipeline::PipelineDefinition;
use sluice_core::domain::schedule::{RunOutcome, ScheduleRecord};
use sluice_core::domain::task::ContentProcessingTask;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::execution::ExecutionStore;
use crate::lock::LockStore;
use crate::pipeline::PipelineStore;
use crate::schedule::{ScheduleStore, lock_name};

#[derive(Default)]
struct Collections {
    pipelines: HashMap<Uuid, PipelineDefinition>,
    schedules: HashMap<Uuid, ScheduleRecord>,
    locks: HashMap<String, LockRecord>,
    executions: HashMap<Uuid, ExecutionRecord>,
}

impl Collections {
    fn lease_is_current(&self, name: &str, fencing_token: i64, now: DateTime<Utc>) -> bool {
        self.locks
            .get(name)
            .is_some_and(|rec| rec.fencing_token == fencing_token && !rec.is_expired(now))
    }
}

/// In-memory implementation of the lock, schedule, pipeline and execution stores
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<Collections>,
}

impl MemoryStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> MutexGuard<'_, Collections> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LockStore for MemoryStore {
    async fn try_acquire(
        &self,
        name: &str,
        holder_id: &str,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<AcquireOutcome> {
        let mut data = self.data();

        let fencing_token = match data.locks.get(name) {
            Some(rec) if !rec.is_expired(now) => return Ok(AcquireOutcome::Busy),
            Some(rec) => rec.fencing_token + 1,
            None => 1,
        };

        let record = LockRecord {
            name: name.to_string(),
            holder_id: holder_id.to_string(),
            acquired_at: now,
            expires_at: now + ttl,
            fencing_token,
        };
        data.locks.insert(name.to_string(), record);

        Ok(AcquireOutcome::Acquired(Lease {
            name: name.to_string(),
            holder_id: holder_id.to_string(),
            fencing_token,
            acquired_at: now,
            expires_at: now + ttl,
            ttl,
        }))
    }

    async fn renew(&self, lease: &Lease, now: DateTime<Utc>) -> StoreResult<RenewOutcome> {
        let mut data = self.data();

        match data.locks.get_mut(&lease.name) {
            Some(rec)
                if rec.fencing_token == lease.fencing_token
                    && rec.holder_id == lease.holder_id
                    && !rec.is_expired(now) =>
            {
                rec.expires_at = now + lease.ttl;
                Ok(RenewOutcome::Renewed(lease.extended(rec.expires_at)))
            }
            _ => Ok(RenewOutcome::Expired),
        }
    }

    async fn release(&self, lease: &Lease, now: DateTime<Utc>) -> StoreResult<()> {
        let mut data = self.data();

        if let Some(rec) = data.locks.get_mut(&lease.name) {
            if rec.fencing_token == lease.fencing_token {
                rec.expires_at = rec.expires_at.min(now);
            }
        }

        Ok(())
    }

    async fn get(&self, name: &str) -> StoreResult<Option<LockRecord>> {
        Ok(self.data().locks.get(name).cloned())
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn ensure(
        &self,
        pipeline_id: Uuid,
        polling_interval_secs: u64,
        now: DateTime<Utc>,
    ) -> StoreResult<ScheduleRecord> {
        let mut data = self.data();

        let record = data
            .schedules
            .entry(pipeline_id)
            .and_modify(|rec| rec.polling_interval_secs = polling_interval_secs)
            .or_insert_with(|| ScheduleRecord::new(pipeline_id, polling_interval_secs, now));

        Ok(record.clone())
    }

    async fn get(&self, pipeline_id: Uuid) -> StoreResult<Option<ScheduleRecord>> {
        Ok(self.data().schedules.get(&pipeline_id).cloned())
    }

    async fn list(&self) -> StoreResult<Vec<ScheduleRecord>> {
        let mut records: Vec<_> = self.data().schedules.values().cloned().collect();
        records.sort_by_key(|r| r.next_due_at);
        Ok(records)
    }

    async fn list_due(&self, now: DateTime<Utc>) -> StoreResult<Vec<ScheduleRecord>> {
        let mut records: Vec<_> = self
            .data()
            .schedules
            .values()
            .filter(|r| r.is_due(now))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.next_due_at);
        Ok(records)
    }

    async fn record_success(
        &self,
        pipeline_id: Uuid,
        fencing_token: i64,
        ran_at: DateTime<Utc>,
        next_due_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut data = self.data();

        if !data.lease_is_current(&lock_name(pipeline_id), fencing_token, now) {
            return Ok(false);
        }

        let rec = data
            .schedules
            .get_mut(&pipeline_id)
            .ok_or_else(|| StoreError::NotFound(format!("schedule {}", pipeline_id)))?;
        rec.next_due_at = next_due_at;
        rec.last_run_at = Some(ran_at);
        rec.last_run_outcome = Some(RunOutcome::Success);
        rec.last_error = None;
        rec.fencing_token = fencing_token;

        Ok(true)
    }

    async fn record_failure(
        &self,
        pipeline_id: Uuid,
        fencing_token: i64,
        ran_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut data = self.data();

        if !data.lease_is_current(&lock_name(pipeline_id), fencing_token, now) {
            return Ok(false);
        }

        let rec = data
            .schedules
            .get_mut(&pipeline_id)
            .ok_or_else(|| StoreError::NotFound(format!("schedule {}", pipeline_id)))?;
        rec.last_run_at = Some(ran_at);
        rec.last_run_outcome = Some(RunOutcome::Failed);
        rec.last_error = Some(error.to_string());
        rec.fencing_token = fencing_token;

        Ok(true)
    }
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn get(&self, id: Uuid) -> StoreResult<Option<PipelineDefinition>> {
        Ok(self.data().pipelines.get(&id).cloned())
    }

    async fn list_enabled(&self) -> StoreResult<Vec<PipelineDefinition>> {
        let mut pipelines: Vec<_> = self
            .data()
            .pipelines
            .values()
            .filter(|p| p.enabled)
            .cloned()
            .collect();
        pipelines.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(pipelines)
    }

    async fn upsert(&self, pipeline: &PipelineDefinition) -> StoreResult<()> {
        self.data().pipelines.insert(pipeline.id, pipeline.clone());
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn start_attempt(
        &self,
        task: &ContentProcessingTask,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<ExecutionRecord> {
        let mut data = self.data();

        let record = data
            .executions
            .entry(task.execution_id)
            .or_insert_with(|| ExecutionRecord {
                execution_id: task.execution_id,
                task_id: task.task_id,
                pipeline_id: task.pipeline_id,
                content_id: task.content_id.clone(),
                status: ExecutionStatus::Pending,
                attempt: 0,
                worker_id: None,
                created_at: now,
                updated_at: now,
                error: None,
                events: Vec::new(),
            });

        if record.status.is_terminal() {
            return Ok(record.clone());
        }

        let attempt = record.attempt.max(task.attempt_count) + 1;
        record.status = ExecutionStatus::Running;
        record.attempt = attempt;
        record.worker_id = Some(worker_id.to_string());
        record.updated_at = now;
        record.events.push(ExecutionEvent::new(
            now,
            ExecutionStatus::Running,
            Some(format!("attempt {} started on {}", attempt, worker_id)),
        ));

        Ok(record.clone())
    }

    async fn update_status(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut data = self.data();

        let record = data
            .executions
            .get_mut(&execution_id)
            .ok_or_else(|| StoreError::NotFound(format!("execution {}", execution_id)))?;

        if record.status.is_terminal() {
            return Ok(false);
        }

        record.status = status;
        record.updated_at = now;
        if status == ExecutionStatus::Failed && message.is_some() {
            record.error = message.clone();
        }
        record.events.push(ExecutionEvent::new(now, status, message));

        Ok(true)
    }

    async fn get(&self, execution_id: Uuid) -> StoreResult<Option<ExecutionRecord>> {
        Ok(self.data().executions.get(&execution_id).cloned())
    }

    async fn list_by_pipeline(
        &self,
        pipeline_id: Uuid,
        limit: usize,
    ) -> StoreResult<Vec<ExecutionRecord>> {
        let mut records: Vec<_> = self
            .data()
            .executions
            .values()
            .filter(|r| r.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(pipeline_id: Uuid, content_id: &str) -> ContentProcessingTask {
        ContentProcessingTask {
            task_id: Uuid::new_v4(),
            task_type: "content_processing".to_string(),
            pipeline_id,
            pipeline_name: "ingest".to_string(),
            execution_id: Uuid::new_v4(),
            content_id: content_id.to_string(),
            content_data: json!({}),
            executed_input_executor: "poll".to_string(),
            priority: 0,
            max_retries: 3,
            attempt_count: 0,
        }
    }

    async fn lease(store: &MemoryStore, pipeline_id: Uuid, now: DateTime<Utc>) -> Lease {
        match LockStore::try_acquire(
            store,
            &lock_name(pipeline_id),
            "scheduler-0",
            chrono::Duration::seconds(60),
            now,
        )
        .await
        .unwrap()
        {
            AcquireOutcome::Acquired(lease) => lease,
            AcquireOutcome::Busy => panic!("lock should be free"),
        }
    }

    #[tokio::test]
    async fn test_ensure_keeps_next_due_at() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        let now = Utc::now();

        let created = store.ensure(id, 60, now).await.unwrap();
        assert_eq!(created.next_due_at, now);

        let later = now + chrono::Duration::seconds(10);
        let refreshed = store.ensure(id, 120, later).await.unwrap();
        assert_eq!(refreshed.next_due_at, now);
        assert_eq!(refreshed.polling_interval_secs, 120);
    }

    #[tokio::test]
    async fn test_list_due_filters_future_records() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let due = Uuid::new_v4();
        let later = Uuid::new_v4();

        store.ensure(due, 60, now).await.unwrap();
        store
            .ensure(later, 60, now + chrono::Duration::seconds(30))
            .await
            .unwrap();

        let listed = store.list_due(now).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].pipeline_id, due);
        assert_eq!(store.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fenced_success_write() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        let now = Utc::now();
        store.ensure(id, 60, now).await.unwrap();

        let lease = lease(&store, id, now).await;
        let next = now + chrono::Duration::seconds(60);
        assert!(
            store
                .record_success(id, lease.fencing_token, now, next, now)
                .await
                .unwrap()
        );

        let rec = ScheduleStore::get(&store, id).await.unwrap().unwrap();
        assert_eq!(rec.next_due_at, next);
        assert_eq!(rec.last_run_outcome, Some(RunOutcome::Success));
        assert_eq!(rec.fencing_token, lease.fencing_token);
    }

    #[tokio::test]
    async fn test_stale_token_write_rejected() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        let now = Utc::now();
        store.ensure(id, 60, now).await.unwrap();

        let stale = lease(&store, id, now).await;
        let later = now + chrono::Duration::seconds(61);
        let fresh = lease(&store, id, later).await;

        // Old holder with a skewed clock still thinks it is within its lease
        let next = now + chrono::Duration::seconds(60);
        assert!(
            !store
                .record_success(id, stale.fencing_token, now, next, now)
                .await
                .unwrap()
        );
        assert!(
            !store
                .record_failure(id, stale.fencing_token, now, "boom", now)
                .await
                .unwrap()
        );

        let rec = ScheduleStore::get(&store, id).await.unwrap().unwrap();
        assert_eq!(rec.next_due_at, now);
        assert_eq!(rec.last_run_outcome, None);

        assert!(
            store
                .record_failure(id, fresh.fencing_token, later, "boom", later)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_expired_lease_write_rejected() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        let now = Utc::now();
        store.ensure(id, 60, now).await.unwrap();

        let lease = lease(&store, id, now).await;
        let after_expiry = now + chrono::Duration::seconds(60);
        assert!(
            !store
                .record_success(id, lease.fencing_token, now, after_expiry, after_expiry)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_failure_keeps_next_due_at() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        let now = Utc::now();
        store.ensure(id, 60, now).await.unwrap();

        let lease = lease(&store, id, now).await;
        assert!(
            store
                .record_failure(id, lease.fencing_token, now, "source offline", now)
                .await
                .unwrap()
        );

        let rec = ScheduleStore::get(&store, id).await.unwrap().unwrap();
        assert_eq!(rec.next_due_at, now);
        assert_eq!(rec.last_run_outcome, Some(RunOutcome::Failed));
        assert_eq!(rec.last_error.as_deref(), Some("source offline"));
    }

    #[tokio::test]
    async fn test_execution_redelivery_updates_same_record() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let t = task(Uuid::new_v4(), "a.pdf");

        let first = store.start_attempt(&t, "processing-0", now).await.unwrap();
        assert_eq!(first.attempt, 1);
        assert!(
            store
                .update_status(
                    t.execution_id,
                    ExecutionStatus::Pending,
                    Some("attempt 1 failed".to_string()),
                    now,
                )
                .await
                .unwrap()
        );

        // The redelivered body still carries attempt_count 0
        let second = store.start_attempt(&t, "processing-1", now).await.unwrap();
        assert_eq!(second.attempt, 2);
        assert_eq!(second.worker_id.as_deref(), Some("processing-1"));
        assert_eq!(second.events.len(), 3);

        assert!(
            store
                .update_status(
                    t.execution_id,
                    ExecutionStatus::Failed,
                    Some("runner error".to_string()),
                    now,
                )
                .await
                .unwrap()
        );
        let rec = ExecutionStore::get(&store, t.execution_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rec.status, ExecutionStatus::Failed);
        assert_eq!(rec.error.as_deref(), Some("runner error"));
    }

    #[tokio::test]
    async fn test_attempt_counts_started_attempts_only() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut t = task(Uuid::new_v4(), "a.pdf");

        // A body carrying an earlier count still wins over a fresh record
        t.attempt_count = 2;
        assert_eq!(store.start_attempt(&t, "processing-0", now).await.unwrap().attempt, 3);

        let fresh = task(Uuid::new_v4(), "b.pdf");
        assert_eq!(store.start_attempt(&fresh, "processing-0", now).await.unwrap().attempt, 1);
        assert_eq!(store.start_attempt(&fresh, "processing-1", now).await.unwrap().attempt, 2);
    }

    #[tokio::test]
    async fn test_terminal_record_is_immutable() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let t = task(Uuid::new_v4(), "a.pdf");

        store.start_attempt(&t, "processing-0", now).await.unwrap();
        assert!(
            store
                .update_status(t.execution_id, ExecutionStatus::Completed, None, now)
                .await
                .unwrap()
        );

        // A worker whose delivery lapsed reports a late failure
        let later = now + chrono::Duration::seconds(5);
        assert!(
            !store
                .update_status(
                    t.execution_id,
                    ExecutionStatus::Failed,
                    Some("late failure".to_string()),
                    later,
                )
                .await
                .unwrap()
        );

        let restarted = store.start_attempt(&t, "processing-1", later).await.unwrap();
        assert_eq!(restarted.status, ExecutionStatus::Completed);
        assert_eq!(restarted.attempt, 1);
        assert_eq!(restarted.worker_id.as_deref(), Some("processing-0"));

        let rec = ExecutionStore::get(&store, t.execution_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rec.status, ExecutionStatus::Completed);
        assert_eq!(rec.error, None);
        assert_eq!(rec.updated_at, now);
        assert_eq!(rec.events.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_content_creates_separate_records() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let pipeline_id = Uuid::new_v4();

        store
            .start_attempt(&task(pipeline_id, "a.pdf"), "processing-0", now)
            .await
            .unwrap();
        store
            .start_attempt(&task(pipeline_id, "a.pdf"), "processing-1", now)
            .await
            .unwrap();

        let records = store.list_by_pipeline(pipeline_id, 10).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.content_id == "a.pdf"));
        assert_ne!(records[0].execution_id, records[1].execution_id);
    }

    #[tokio::test]
    async fn test_update_unknown_execution_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .update_status(Uuid::new_v4(), ExecutionStatus::Completed, None, Utc::now())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
