//! Engine context
//!
//! The set of capabilities a scheduler or worker process runs against.
//! Production processes build it over PostgreSQL; tests build it over the
//! in-memory backend with a manual clock.

use anyhow::{Context, Result};
use sluice_core::{Clock, SystemClock};
use sluice_store::db;
use sluice_store::{
    ExecutionStore, LockManager, PgStore, PgTaskQueue, PipelineStore, ScheduleStore, TaskQueue,
};
use std::sync::Arc;

use crate::config::Config;
use crate::runner::{HttpPipelineRunner, PipelineRunner};

/// Shared capabilities of one engine process
#[derive(Clone)]
pub struct EngineContext {
    pub pipelines: Arc<dyn PipelineStore>,
    pub schedules: Arc<dyn ScheduleStore>,
    pub executions: Arc<dyn ExecutionStore>,
    pub locks: LockManager,
    pub queue: Arc<dyn TaskQueue>,
    pub runner: Arc<dyn PipelineRunner>,
    pub clock: Arc<dyn Clock>,
}

impl EngineContext {
    /// Connects to PostgreSQL and the pipeline runner
    pub async fn connect(config: &Config, max_connections: u32) -> Result<Self> {
        let pool = db::create_pool(&config.database_url, max_connections)
            .await
            .context("Failed to connect to database")?;

        let store = Arc::new(PgStore::new(pool.clone()));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let runner = HttpPipelineRunner::new(&config.pipeline_runner_url, config.task_timeout)?;

        Ok(Self {
            pipelines: store.clone(),
            schedules: store.clone(),
            executions: store.clone(),
            locks: LockManager::new(store, clock.clone()),
            queue: Arc::new(PgTaskQueue::new(pool)),
            runner: Arc::new(runner),
            clock,
        })
    }
}
