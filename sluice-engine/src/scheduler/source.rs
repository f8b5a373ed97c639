//! Source scheduler
//!
//! Each scheduler process loops over ticks. A tick reconciles schedule
//! records with the enabled pipelines, lists the due ones and, for every due
//! pipeline whose lease it wins, runs discovery and enqueues one task per
//! discovered item.
//!
//! The due list is a snapshot, so a won lease is followed by a fresh read of
//! the schedule: another scheduler may have run the pipeline in between.
//!
//! The schedule is advanced only after a complete run, and only through a
//! write fenced by the lease's token. A scheduler that loses its lease
//! abandons the run without touching the schedule.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sluice_core::domain::content::ContentItem;
use sluice_core::domain::lock::{AcquireOutcome, Lease, RenewOutcome};
use sluice_core::domain::pipeline::PipelineDefinition;
use sluice_core::domain::task::ContentProcessingTask;
use sluice_store::lock::chrono_ttl;
use sluice_store::schedule::lock_name;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::context::EngineContext;
use crate::retry::{RetryPolicy, retry_transient};

/// Scheduler timing and task defaults
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub tick: Duration,
    pub lock_ttl: Duration,
    pub default_polling_interval: Duration,
    pub max_task_retries: u32,
    pub store_retry: RetryPolicy,
}

impl From<&Config> for SchedulerSettings {
    fn from(config: &Config) -> Self {
        Self {
            tick: config.scheduler_tick,
            lock_ttl: config.lock_ttl,
            default_polling_interval: config.default_polling_interval,
            max_task_retries: config.max_task_retries,
            store_retry: RetryPolicy::STORE,
        }
    }
}

/// Counters for one scheduler tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Due schedules of enabled pipelines
    pub due: usize,
    /// Runs that completed and advanced their schedule
    pub ran: usize,
    /// Due pipelines whose lease was held elsewhere
    pub skipped_busy: usize,
    /// Due pipelines already run elsewhere since the due list was read
    pub skipped_not_due: usize,
    /// Runs whose discovery or enqueueing failed
    pub failed: usize,
    /// Runs abandoned because the lease was lost
    pub lease_lost: usize,
    pub tasks_enqueued: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunStatus {
    Completed,
    Busy,
    NotDue,
    Failed,
    LeaseLost,
    Interrupted,
}

enum Discovery {
    Items(Vec<ContentItem>),
    Failed(anyhow::Error),
    LeaseLost,
}

/// Source scheduler process loop
pub struct SourceScheduler {
    worker_id: String,
    settings: SchedulerSettings,
    ctx: EngineContext,
}

impl SourceScheduler {
    /// Creates a new source scheduler
    pub fn new(worker_id: impl Into<String>, settings: SchedulerSettings, ctx: EngineContext) -> Self {
        Self {
            worker_id: worker_id.into(),
            settings,
            ctx,
        }
    }

    /// Runs ticks until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            worker_id = %self.worker_id,
            "Starting source scheduler (tick: {:?}, lock ttl: {:?})",
            self.settings.tick, self.settings.lock_ttl
        );

        while !shutdown.is_cancelled() {
            match self.tick(&shutdown).await {
                Ok(report) if report.due > 0 => {
                    info!(
                        worker_id = %self.worker_id,
                        due = report.due,
                        ran = report.ran,
                        busy = report.skipped_busy,
                        not_due = report.skipped_not_due,
                        failed = report.failed,
                        lease_lost = report.lease_lost,
                        "Enqueued {} task(s) this tick",
                        report.tasks_enqueued
                    );
                }
                Ok(_) => debug!("No pipelines due"),
                Err(e) => error!(worker_id = %self.worker_id, "Error during scheduler tick: {:#}", e),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.settings.tick) => {}
            }
        }

        info!(worker_id = %self.worker_id, "Source scheduler stopped");
    }

    /// Performs one scan over the due pipelines
    pub async fn tick(&self, shutdown: &CancellationToken) -> Result<TickReport> {
        let pipelines = self
            .ctx
            .pipelines
            .list_enabled()
            .await
            .context("Failed to list enabled pipelines")?;

        let now = self.ctx.clock.now();
        for pipeline in &pipelines {
            let interval = pipeline.polling_interval(self.settings.default_polling_interval);
            if let Err(e) = self
                .ctx
                .schedules
                .ensure(pipeline.id, interval.as_secs(), now)
                .await
            {
                warn!(pipeline_id = %pipeline.id, "Failed to reconcile schedule: {}", e);
            }
        }

        let by_id: HashMap<_, _> = pipelines.iter().map(|p| (p.id, p)).collect();
        let due = self
            .ctx
            .schedules
            .list_due(now)
            .await
            .context("Failed to list due schedules")?;

        let mut report = TickReport::default();

        for schedule in due {
            if shutdown.is_cancelled() {
                break;
            }

            // Disabled or deleted pipelines keep their record but are not run
            let Some(pipeline) = by_id.get(&schedule.pipeline_id) else {
                continue;
            };

            report.due += 1;
            let (status, enqueued) = self.run_pipeline(pipeline, shutdown).await;
            report.tasks_enqueued += enqueued;

            match status {
                RunStatus::Completed => report.ran += 1,
                RunStatus::Busy => report.skipped_busy += 1,
                RunStatus::NotDue => report.skipped_not_due += 1,
                RunStatus::Failed => report.failed += 1,
                RunStatus::LeaseLost => report.lease_lost += 1,
                RunStatus::Interrupted => break,
            }
        }

        Ok(report)
    }

    /// Runs one pipeline under its lease; returns the status and tasks enqueued
    async fn run_pipeline(
        &self,
        pipeline: &PipelineDefinition,
        shutdown: &CancellationToken,
    ) -> (RunStatus, usize) {
        let name = lock_name(pipeline.id);

        let mut lease = match self
            .ctx
            .locks
            .try_acquire(&name, &self.worker_id, self.settings.lock_ttl)
            .await
        {
            AcquireOutcome::Acquired(lease) => lease,
            AcquireOutcome::Busy => {
                debug!(pipeline_id = %pipeline.id, "Pipeline locked elsewhere, skipping");
                return (RunStatus::Busy, 0);
            }
        };

        match self.still_due(pipeline).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(pipeline_id = %pipeline.id, "Pipeline already ran elsewhere, skipping");
                self.ctx.locks.release(&lease).await;
                return (RunStatus::NotDue, 0);
            }
            Err(e) => {
                warn!(pipeline_id = %pipeline.id, "Failed to re-read schedule: {:#}", e);
                self.ctx.locks.release(&lease).await;
                return (RunStatus::Failed, 0);
            }
        }

        info!(
            worker_id = %self.worker_id,
            pipeline_id = %pipeline.id,
            token = lease.fencing_token,
            "Running discovery for pipeline '{}'",
            pipeline.name
        );

        let mut enqueued = 0;
        let status = self
            .run_locked(pipeline, &mut lease, shutdown, &mut enqueued)
            .await;

        self.ctx.locks.release(&lease).await;
        (status, enqueued)
    }

    async fn run_locked(
        &self,
        pipeline: &PipelineDefinition,
        lease: &mut Lease,
        shutdown: &CancellationToken,
        enqueued: &mut usize,
    ) -> RunStatus {
        let started_at = self.ctx.clock.now();

        let items = match self.discover_under_lease(pipeline, lease).await {
            Discovery::Items(items) => items,
            Discovery::LeaseLost => {
                warn!(pipeline_id = %pipeline.id, "Lease lost during discovery, abandoning run");
                return RunStatus::LeaseLost;
            }
            Discovery::Failed(e) => {
                let message = format!("{:#}", e);
                warn!(pipeline_id = %pipeline.id, "Discovery failed: {}", message);
                self.record_failure(pipeline, lease, started_at, &message).await;
                return RunStatus::Failed;
            }
        };

        debug!(pipeline_id = %pipeline.id, "Discovered {} item(s)", items.len());

        for item in items {
            if shutdown.is_cancelled() {
                info!(
                    pipeline_id = %pipeline.id,
                    "Shutdown requested, leaving run unrecorded after {} task(s)",
                    enqueued
                );
                return RunStatus::Interrupted;
            }

            if !self.keep_lease(lease).await {
                warn!(pipeline_id = %pipeline.id, "Lease lost while enqueueing, abandoning run");
                return RunStatus::LeaseLost;
            }

            let task =
                ContentProcessingTask::for_content(pipeline, item, self.settings.max_task_retries);

            match retry_transient("Task send", self.settings.store_retry, || {
                self.ctx.queue.send(&task)
            })
            .await
            {
                Ok(message_id) => {
                    debug!(
                        task_id = %task.task_id,
                        content_id = %task.content_id,
                        message_id = %message_id,
                        "Task enqueued"
                    );
                    *enqueued += 1;
                }
                Err(e) => {
                    let message =
                        format!("Failed to enqueue task for content {}: {}", task.content_id, e);
                    error!(pipeline_id = %pipeline.id, "{}", message);
                    self.record_failure(pipeline, lease, started_at, &message).await;
                    return RunStatus::Failed;
                }
            }
        }

        if !self.keep_lease(lease).await {
            warn!(pipeline_id = %pipeline.id, "Lease lost before schedule update, abandoning run");
            return RunStatus::LeaseLost;
        }

        let now = self.ctx.clock.now();
        let interval = pipeline.polling_interval(self.settings.default_polling_interval);
        let next_due_at = now + chrono_ttl(interval);

        match retry_transient("Schedule update", self.settings.store_retry, || {
            self.ctx
                .schedules
                .record_success(pipeline.id, lease.fencing_token, started_at, next_due_at, now)
        })
        .await
        {
            Ok(true) => {
                info!(
                    pipeline_id = %pipeline.id,
                    next_due_at = %next_due_at,
                    "Run completed with {} task(s)",
                    enqueued
                );
                RunStatus::Completed
            }
            Ok(false) => {
                warn!(
                    pipeline_id = %pipeline.id,
                    token = lease.fencing_token,
                    "Schedule update rejected, lease no longer current"
                );
                RunStatus::LeaseLost
            }
            Err(e) => {
                error!(pipeline_id = %pipeline.id, "Failed to update schedule: {}", e);
                RunStatus::Failed
            }
        }
    }

    /// Reads the pipeline's schedule again; false once it is no longer due
    async fn still_due(&self, pipeline: &PipelineDefinition) -> Result<bool> {
        let schedule = retry_transient("Schedule read", self.settings.store_retry, || {
            self.ctx.schedules.get(pipeline.id)
        })
        .await
        .context("Failed to read schedule")?;

        Ok(schedule.is_some_and(|s| s.is_due(self.ctx.clock.now())))
    }

    /// Runs discovery while renewing the lease every half TTL
    ///
    /// Losing the lease drops the discovery future.
    async fn discover_under_lease(&self, pipeline: &PipelineDefinition, lease: &mut Lease) -> Discovery {
        let discovery = self.ctx.runner.discover(pipeline);
        tokio::pin!(discovery);

        let renew_every = self.settings.lock_ttl / 2;

        loop {
            tokio::select! {
                result = &mut discovery => {
                    return match result {
                        Ok(items) => Discovery::Items(items),
                        Err(e) => Discovery::Failed(e),
                    };
                }
                _ = tokio::time::sleep(renew_every) => {
                    match self.ctx.locks.renew(lease).await {
                        RenewOutcome::Renewed(renewed) => *lease = renewed,
                        RenewOutcome::Expired => return Discovery::LeaseLost,
                    }
                }
            }
        }
    }

    /// Renews `lease` if it is past its half-life; false once it is lost
    async fn keep_lease(&self, lease: &mut Lease) -> bool {
        if !lease.renew_due(self.ctx.clock.now()) {
            return true;
        }

        match self.ctx.locks.renew(lease).await {
            RenewOutcome::Renewed(renewed) => {
                *lease = renewed;
                true
            }
            RenewOutcome::Expired => false,
        }
    }

    async fn record_failure(
        &self,
        pipeline: &PipelineDefinition,
        lease: &Lease,
        ran_at: DateTime<Utc>,
        message: &str,
    ) {
        let now = self.ctx.clock.now();

        match retry_transient("Schedule failure update", self.settings.store_retry, || {
            self.ctx
                .schedules
                .record_failure(pipeline.id, lease.fencing_token, ran_at, message, now)
        })
        .await
        {
            Ok(true) => {}
            Ok(false) => warn!(
                pipeline_id = %pipeline.id,
                "Failure not recorded, lease no longer current"
            ),
            Err(e) => warn!(pipeline_id = %pipeline.id, "Failed to record run failure: {}", e),
        }
    }
}
