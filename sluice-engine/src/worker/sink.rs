//! Terminal failure reporting

use async_trait::async_trait;
use sluice_core::domain::task::ContentProcessingTask;
use tracing::error;

/// Receives tasks that exhausted their retries
#[async_trait]
pub trait FailureSink: Send + Sync {
    async fn report(&self, task: &ContentProcessingTask, error: &str);
}

/// Reports terminal failures as `error!` events on the `sluice::failures` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingFailureSink;

#[async_trait]
impl FailureSink for TracingFailureSink {
    async fn report(&self, task: &ContentProcessingTask, error: &str) {
        error!(
            target: "sluice::failures",
            task_id = %task.task_id,
            execution_id = %task.execution_id,
            pipeline_id = %task.pipeline_id,
            pipeline_name = %task.pipeline_name,
            content_id = %task.content_id,
            attempts = task.attempt_count,
            "Task failed permanently: {}",
            error
        );
    }
}
