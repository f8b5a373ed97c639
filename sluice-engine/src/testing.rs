//! Test fixtures shared by the scheduler, worker and API tests

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sluice_core::ManualClock;
use sluice_core::domain::content::{ContentItem, ExecutionOutcome};
use sluice_core::domain::execution::{ExecutionRecord, ExecutionStatus};
use sluice_core::domain::pipeline::{PipelineDefinition, StepDefinition};
use sluice_core::domain::schedule::ScheduleRecord;
use sluice_core::domain::task::ContentProcessingTask;
use sluice_store::{
    ExecutionStore, LockManager, MemoryStore, MemoryTaskQueue, PipelineStore, QueueMessage,
    ScheduleStore, StoreError, StoreResult, TaskQueue,
};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::context::EngineContext;
use crate::runner::PipelineRunner;

pub type Hook = Box<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

fn hook<F, Fut>(f: F) -> Hook
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Box::new(move || -> Pin<Box<dyn Future<Output = ()> + Send>> { Box::pin(f()) })
}

/// A recorded `execute` call
#[derive(Debug, Clone)]
pub struct ExecuteCall {
    pub pipeline_id: Uuid,
    pub skip_step: Option<String>,
    pub content_id: String,
    pub step_ids: Vec<String>,
}

/// Scriptable [`PipelineRunner`]
#[derive(Default)]
pub struct StubRunner {
    pub items: Mutex<Vec<ContentItem>>,
    pub discover_error: Mutex<Option<String>>,
    pub discover_hook: Mutex<Option<Hook>>,
    pub discover_delay: Mutex<Duration>,
    pub discover_calls: AtomicUsize,
    /// Consumed front to back; an empty queue means success
    pub outcomes: Mutex<VecDeque<Result<ExecutionOutcome, String>>>,
    pub execute_hook: Mutex<Option<Hook>>,
    pub execute_delay: Mutex<Duration>,
    pub executed: Mutex<Vec<ExecuteCall>>,
}

impl StubRunner {
    pub fn set_items(&self, ids: &[&str]) {
        *self.items.lock().unwrap() = ids.iter().map(|id| content(id)).collect();
    }

    pub fn push_outcome(&self, outcome: Result<ExecutionOutcome, String>) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    /// Runs `f` at the start of every discovery call
    pub fn on_discover<F, Fut>(&self, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        *self.discover_hook.lock().unwrap() = Some(hook(f));
    }

    /// Runs `f` once, inside the next execute call
    pub fn on_execute<F, Fut>(&self, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        *self.execute_hook.lock().unwrap() = Some(hook(f));
    }

    pub fn discover_count(&self) -> usize {
        self.discover_calls.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<ExecuteCall> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl PipelineRunner for StubRunner {
    async fn discover(&self, _pipeline: &PipelineDefinition) -> Result<Vec<ContentItem>> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);

        let hook = self.discover_hook.lock().unwrap().as_ref().map(|hook| hook());
        if let Some(hook) = hook {
            hook.await;
        }

        let delay = *self.discover_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.discover_error.lock().unwrap().clone() {
            anyhow::bail!(err);
        }
        Ok(self.items.lock().unwrap().clone())
    }

    async fn execute(
        &self,
        pipeline: &PipelineDefinition,
        skip_step: Option<&str>,
        content: &ContentItem,
    ) -> Result<ExecutionOutcome> {
        self.executed.lock().unwrap().push(ExecuteCall {
            pipeline_id: pipeline.id,
            skip_step: skip_step.map(str::to_string),
            content_id: content.content_id.clone(),
            step_ids: pipeline.steps.iter().map(|s| s.id.clone()).collect(),
        });

        let hook = self.execute_hook.lock().unwrap().take();
        if let Some(hook) = hook {
            hook().await;
        }

        let delay = *self.execute_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match self.outcomes.lock().unwrap().pop_front() {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(err)) => anyhow::bail!(err),
            None => Ok(ExecutionOutcome::succeeded(Some(json!({ "ok": true })))),
        }
    }
}

pub fn content(id: &str) -> ContentItem {
    ContentItem {
        content_id: id.to_string(),
        data: json!({ "path": id }),
    }
}

/// Three-step pipeline whose input step polls every `polling_secs`
pub fn pipeline(polling_secs: u64) -> PipelineDefinition {
    PipelineDefinition {
        id: Uuid::new_v4(),
        name: "ingest".to_string(),
        version: 1,
        enabled: true,
        input_executor: "poll".to_string(),
        steps: vec![
            StepDefinition {
                id: "poll".to_string(),
                kind: "blob_poller".to_string(),
                settings: json!({ "polling_interval_seconds": polling_secs }),
                next: vec!["extract".to_string()],
            },
            StepDefinition {
                id: "extract".to_string(),
                kind: "text_extract".to_string(),
                settings: json!({}),
                next: vec!["index".to_string()],
            },
            StepDefinition {
                id: "index".to_string(),
                kind: "indexer".to_string(),
                settings: json!({}),
                next: vec![],
            },
        ],
        updated_at: chrono::Utc::now(),
    }
}

/// In-memory engine wired to a manual clock
pub struct Harness {
    pub ctx: EngineContext,
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryTaskQueue>,
    pub runner: Arc<StubRunner>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryTaskQueue::new(clock.clone()));
        let runner = Arc::new(StubRunner::default());

        let ctx = EngineContext {
            pipelines: store.clone(),
            schedules: store.clone(),
            executions: store.clone(),
            locks: LockManager::new(store.clone(), clock.clone()),
            queue: queue.clone(),
            runner: runner.clone(),
            clock: clock.clone(),
        };

        Self {
            ctx,
            store,
            queue,
            runner,
            clock,
        }
    }

    /// Stores an enabled pipeline polling every `polling_secs`
    pub async fn add_pipeline(&self, polling_secs: u64) -> PipelineDefinition {
        let p = pipeline(polling_secs);
        self.store.upsert(&p).await.unwrap();
        p
    }
}

/// Schedule and execution store that fails chosen operations with a
/// transient error before delegating to a [`MemoryStore`]
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    failures: Mutex<HashMap<&'static str, usize>>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            failures: Mutex::default(),
            calls: Mutex::default(),
        }
    }

    /// Fails the next `times` calls of `op`
    pub fn fail_next(&self, op: &'static str, times: usize) {
        self.failures.lock().unwrap().insert(op, times);
    }

    pub fn calls(&self, op: &'static str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    fn trip(&self, op: &'static str) -> StoreResult<()> {
        *self.calls.lock().unwrap().entry(op).or_default() += 1;

        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(op) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Err(StoreError::Unavailable(format!("{} unavailable", op)))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ScheduleStore for FlakyStore {
    async fn ensure(
        &self,
        pipeline_id: Uuid,
        polling_interval_secs: u64,
        now: DateTime<Utc>,
    ) -> StoreResult<ScheduleRecord> {
        self.trip("ensure")?;
        ScheduleStore::ensure(self.inner.as_ref(), pipeline_id, polling_interval_secs, now).await
    }

    async fn get(&self, pipeline_id: Uuid) -> StoreResult<Option<ScheduleRecord>> {
        self.trip("get_schedule")?;
        ScheduleStore::get(self.inner.as_ref(), pipeline_id).await
    }

    async fn list(&self) -> StoreResult<Vec<ScheduleRecord>> {
        self.trip("list")?;
        ScheduleStore::list(self.inner.as_ref()).await
    }

    async fn list_due(&self, now: DateTime<Utc>) -> StoreResult<Vec<ScheduleRecord>> {
        self.trip("list_due")?;
        ScheduleStore::list_due(self.inner.as_ref(), now).await
    }

    async fn record_success(
        &self,
        pipeline_id: Uuid,
        fencing_token: i64,
        ran_at: DateTime<Utc>,
        next_due_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.trip("record_success")?;
        ScheduleStore::record_success(
            self.inner.as_ref(),
            pipeline_id,
            fencing_token,
            ran_at,
            next_due_at,
            now,
        )
        .await
    }

    async fn record_failure(
        &self,
        pipeline_id: Uuid,
        fencing_token: i64,
        ran_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.trip("record_failure")?;
        ScheduleStore::record_failure(self.inner.as_ref(), pipeline_id, fencing_token, ran_at, error, now)
            .await
    }
}

#[async_trait]
impl ExecutionStore for FlakyStore {
    async fn start_attempt(
        &self,
        task: &ContentProcessingTask,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<ExecutionRecord> {
        self.trip("start_attempt")?;
        ExecutionStore::start_attempt(self.inner.as_ref(), task, worker_id, now).await
    }

    async fn update_status(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.trip("update_status")?;
        ExecutionStore::update_status(self.inner.as_ref(), execution_id, status, message, now).await
    }

    async fn get(&self, execution_id: Uuid) -> StoreResult<Option<ExecutionRecord>> {
        self.trip("get_execution")?;
        ExecutionStore::get(self.inner.as_ref(), execution_id).await
    }

    async fn list_by_pipeline(
        &self,
        pipeline_id: Uuid,
        limit: usize,
    ) -> StoreResult<Vec<ExecutionRecord>> {
        self.trip("list_by_pipeline")?;
        ExecutionStore::list_by_pipeline(self.inner.as_ref(), pipeline_id, limit).await
    }
}

/// Task queue whose sends always fail with a transient error
pub struct FailingQueue {
    inner: Arc<MemoryTaskQueue>,
    pub sends: AtomicUsize,
}

impl FailingQueue {
    pub fn new(inner: Arc<MemoryTaskQueue>) -> Self {
        Self {
            inner,
            sends: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TaskQueue for FailingQueue {
    async fn send(&self, _task: &ContentProcessingTask) -> StoreResult<String> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("queue unavailable".to_string()))
    }

    async fn receive_batch(
        &self,
        max: usize,
        visibility_timeout: Duration,
    ) -> StoreResult<Vec<QueueMessage>> {
        self.inner.receive_batch(max, visibility_timeout).await
    }

    async fn ack(&self, message: &QueueMessage) -> StoreResult<()> {
        self.inner.ack(message).await
    }

    async fn extend_visibility(&self, message: &QueueMessage, duration: Duration) -> StoreResult<()> {
        self.inner.extend_visibility(message, duration).await
    }
}
