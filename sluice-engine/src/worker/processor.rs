//! Processing worker
//!
//! Pulls batches from the task queue and processes them one message at a
//! time. A message is acknowledged only once its outcome is final: success,
//! terminal failure, cancellation, or an undecodable body. Anything else is
//! left to the queue's visibility timeout, which redelivers it.
//!
//! Attempts are numbered from the execution record, so deliveries that were
//! released or lapsed before starting do not use up the retry budget.

use anyhow::{Context, Result};
use sluice_core::domain::content::ExecutionOutcome;
use sluice_core::domain::execution::ExecutionStatus;
use sluice_core::domain::pipeline::PipelineDefinition;
use sluice_core::domain::task::ContentProcessingTask;
use sluice_store::{QueueMessage, StoreError, TaskQueue};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::context::EngineContext;
use crate::retry::{RetryPolicy, retry_transient};
use crate::worker::sink::FailureSink;

/// Queue polling and execution limits
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub max_messages: usize,
    pub visibility_timeout: Duration,
    pub task_timeout: Duration,
    pub store_retry: RetryPolicy,
}

impl From<&Config> for WorkerSettings {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.queue_poll_interval,
            max_messages: config.queue_max_messages,
            visibility_timeout: config.visibility_timeout,
            task_timeout: config.task_timeout,
            store_retry: RetryPolicy::STORE,
        }
    }
}

/// What happened to a single message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Completed,
    /// Left unacknowledged for redelivery
    RetryScheduled,
    Failed,
    Cancelled,
    /// Undecodable body, dropped
    Poison,
    /// Finished elsewhere or no longer held by this worker
    Skipped,
}

/// Processing worker process loop
pub struct ProcessingWorker {
    worker_id: String,
    settings: WorkerSettings,
    ctx: EngineContext,
    sink: Arc<dyn FailureSink>,
}

impl ProcessingWorker {
    /// Creates a new processing worker
    pub fn new(
        worker_id: impl Into<String>,
        settings: WorkerSettings,
        ctx: EngineContext,
        sink: Arc<dyn FailureSink>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            settings,
            ctx,
            sink,
        }
    }

    /// Polls until `shutdown` is cancelled
    ///
    /// Sleeps `poll_interval` only after an empty or failed poll.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            worker_id = %self.worker_id,
            "Starting processing worker (poll interval: {:?}, visibility timeout: {:?})",
            self.settings.poll_interval, self.settings.visibility_timeout
        );

        while !shutdown.is_cancelled() {
            let idle = match self.poll_once(&shutdown).await {
                Ok(0) => true,
                Ok(processed) => {
                    debug!("Processed {} message(s) this cycle", processed);
                    false
                }
                Err(e) => {
                    error!(worker_id = %self.worker_id, "Error during poll cycle: {:#}", e);
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.settings.poll_interval) => {}
                }
            }
        }

        info!(worker_id = %self.worker_id, "Processing worker stopped");
    }

    /// Receives one batch and processes it; returns the number of messages handled
    pub async fn poll_once(&self, shutdown: &CancellationToken) -> Result<usize> {
        let batch = self
            .ctx
            .queue
            .receive_batch(self.settings.max_messages, self.settings.visibility_timeout)
            .await
            .context("Failed to receive messages")?;

        if batch.is_empty() {
            return Ok(0);
        }

        debug!(worker_id = %self.worker_id, "Received {} message(s)", batch.len());

        let mut processed = 0;
        let mut messages = batch.into_iter();

        while let Some(message) = messages.next() {
            if shutdown.is_cancelled() {
                self.release_unstarted(std::iter::once(message).chain(messages))
                    .await;
                break;
            }

            if !self.claim(&message).await {
                continue;
            }

            // A failing message must not take the worker down with it
            if let Err(e) = self.process_message(&message).await {
                error!(
                    worker_id = %self.worker_id,
                    message_id = %message.message_id,
                    "Failed to process message: {:#}",
                    e
                );
            }
            processed += 1;
        }

        Ok(processed)
    }

    /// Processes one received message
    pub async fn process_message(&self, message: &QueueMessage) -> Result<MessageOutcome> {
        let mut task = match ContentProcessingTask::from_json(&message.body) {
            Ok(task) => task,
            Err(e) => {
                error!(
                    worker_id = %self.worker_id,
                    message_id = %message.message_id,
                    "Dropping undecodable message: {}",
                    e
                );
                self.ack(message).await?;
                return Ok(MessageOutcome::Poison);
            }
        };

        let record = retry_transient("Execution start", self.settings.store_retry, || {
            self.ctx
                .executions
                .start_attempt(&task, &self.worker_id, self.ctx.clock.now())
        })
        .await
        .context("Failed to record execution start")?;

        if record.status.is_terminal() {
            info!(
                task_id = %task.task_id,
                execution_id = %task.execution_id,
                status = %record.status,
                "Execution already finished, dropping duplicate delivery"
            );
            self.ack(message).await?;
            return Ok(MessageOutcome::Skipped);
        }

        task.attempt_count = record.attempt.saturating_sub(1);

        info!(
            worker_id = %self.worker_id,
            task_id = %task.task_id,
            execution_id = %task.execution_id,
            attempt = record.attempt,
            "Processing content '{}' of pipeline '{}'",
            task.content_id,
            task.pipeline_name
        );

        let pipeline = match self
            .ctx
            .pipelines
            .get(task.pipeline_id)
            .await
            .context("Failed to load pipeline")?
        {
            Some(pipeline) if pipeline.enabled => pipeline,
            found => {
                let reason = if found.is_some() {
                    "pipeline is disabled"
                } else {
                    "pipeline no longer exists"
                };
                warn!(task_id = %task.task_id, pipeline_id = %task.pipeline_id, "Cancelling task: {}", reason);
                let cancelled = self
                    .set_status(&task, ExecutionStatus::Cancelled, Some(reason.to_string()))
                    .await?;
                self.ack(message).await?;
                return Ok(if cancelled {
                    MessageOutcome::Cancelled
                } else {
                    MessageOutcome::Skipped
                });
            }
        };

        match self.execute(&pipeline, &task, message).await {
            Ok(outcome) if outcome.success => {
                let completed = self
                    .set_status(&task, ExecutionStatus::Completed, None)
                    .await?;
                self.ack(message).await?;
                if !completed {
                    warn!(
                        task_id = %task.task_id,
                        execution_id = %task.execution_id,
                        "Execution was finished elsewhere, result discarded"
                    );
                    return Ok(MessageOutcome::Skipped);
                }
                info!(
                    task_id = %task.task_id,
                    execution_id = %task.execution_id,
                    "Task completed"
                );
                Ok(MessageOutcome::Completed)
            }
            Ok(outcome) => {
                let error = outcome
                    .error
                    .unwrap_or_else(|| "pipeline reported failure".to_string());
                self.handle_failure(task, message, error).await
            }
            Err(e) => self.handle_failure(task, message, format!("{:#}", e)).await,
        }
    }

    /// Runs the pipeline without its input step, under the task deadline,
    /// while keeping the message hidden
    async fn execute(
        &self,
        pipeline: &PipelineDefinition,
        task: &ContentProcessingTask,
        message: &QueueMessage,
    ) -> Result<ExecutionOutcome> {
        let skip_step = task.executed_input_executor.as_str();
        let remaining = pipeline.without_step(skip_step);
        let content = task.content_item();

        let heartbeat = self.spawn_visibility_heartbeat(message.clone());
        let result = tokio::time::timeout(
            self.settings.task_timeout,
            self.ctx.runner.execute(&remaining, Some(skip_step), &content),
        )
        .await;
        heartbeat.abort();

        match result {
            Ok(outcome) => outcome,
            Err(_) => anyhow::bail!("Task timed out after {:?}", self.settings.task_timeout),
        }
    }

    async fn handle_failure(
        &self,
        mut task: ContentProcessingTask,
        message: &QueueMessage,
        error: String,
    ) -> Result<MessageOutcome> {
        let terminal = task.is_final_attempt();
        task.attempt_count += 1;

        if !terminal {
            warn!(
                task_id = %task.task_id,
                execution_id = %task.execution_id,
                attempt = task.attempt_count,
                max_retries = task.max_retries,
                "Attempt failed, leaving message for redelivery: {}",
                error
            );
            let event = format!(
                "attempt {} of {} failed: {}",
                task.attempt_count, task.max_retries, error
            );
            if !self
                .set_status(&task, ExecutionStatus::Pending, Some(event))
                .await?
            {
                return Ok(MessageOutcome::Skipped);
            }
            return Ok(MessageOutcome::RetryScheduled);
        }

        // Only the current holder of the delivery may finish it
        if !self.ack(message).await? {
            warn!(
                task_id = %task.task_id,
                execution_id = %task.execution_id,
                "Delivery lapsed before the final failure, leaving the record to its new holder"
            );
            return Ok(MessageOutcome::Skipped);
        }

        if !self
            .set_status(&task, ExecutionStatus::Failed, Some(error.clone()))
            .await?
        {
            return Ok(MessageOutcome::Skipped);
        }
        self.sink.report(&task, &error).await;
        Ok(MessageOutcome::Failed)
    }

    /// Sets the execution status; false when the record was already terminal
    async fn set_status(
        &self,
        task: &ContentProcessingTask,
        status: ExecutionStatus,
        message: Option<String>,
    ) -> Result<bool> {
        retry_transient("Execution update", self.settings.store_retry, || {
            self.ctx.executions.update_status(
                task.execution_id,
                status,
                message.clone(),
                self.ctx.clock.now(),
            )
        })
        .await
        .with_context(|| format!("Failed to set execution {} to {}", task.execution_id, status))
    }

    /// Acknowledges `message`; false when it was already redelivered
    async fn ack(&self, message: &QueueMessage) -> Result<bool> {
        match retry_transient("Message ack", self.settings.store_retry, || {
            self.ctx.queue.ack(message)
        })
        .await
        {
            Ok(()) => Ok(true),
            Err(StoreError::StaleReceipt(id)) => {
                warn!(message_id = %id, "Message was redelivered before acknowledgement");
                Ok(false)
            }
            Err(e) => Err(e).context("Failed to acknowledge message"),
        }
    }

    /// Re-hides a received message for a full timeout before it starts
    ///
    /// Messages later in a batch may have lapsed while earlier ones ran; false
    /// means another worker holds it now.
    async fn claim(&self, message: &QueueMessage) -> bool {
        match self
            .ctx
            .queue
            .extend_visibility(message, self.settings.visibility_timeout)
            .await
        {
            Ok(()) => true,
            Err(StoreError::StaleReceipt(_)) | Err(StoreError::NotFound(_)) => {
                debug!(message_id = %message.message_id, "Message lapsed before it started, skipping");
                false
            }
            Err(e) => {
                warn!(
                    message_id = %message.message_id,
                    "Failed to claim message, leaving it for redelivery: {}",
                    e
                );
                false
            }
        }
    }

    /// Makes messages that were received but never started visible again
    async fn release_unstarted(&self, messages: impl Iterator<Item = QueueMessage>) {
        for message in messages {
            if let Err(e) = self
                .ctx
                .queue
                .extend_visibility(&message, Duration::ZERO)
                .await
            {
                warn!(message_id = %message.message_id, "Failed to release message: {}", e);
            }
        }
    }

    /// Spawns a background task extending the message's visibility every half timeout
    fn spawn_visibility_heartbeat(&self, message: QueueMessage) -> JoinHandle<()> {
        let queue: Arc<dyn TaskQueue> = Arc::clone(&self.ctx.queue);
        let timeout = self.settings.visibility_timeout;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(timeout / 2);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;

                match queue.extend_visibility(&message, timeout).await {
                    Ok(()) => debug!(message_id = %message.message_id, "Visibility extended"),
                    Err(StoreError::StaleReceipt(_)) | Err(StoreError::NotFound(_)) => {
                        warn!(message_id = %message.message_id, "Message no longer held, stopping heartbeat");
                        break;
                    }
                    Err(e) => warn!(message_id = %message.message_id, "Failed to extend visibility: {}", e),
                }
            }
        })
    }
}
