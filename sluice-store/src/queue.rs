//! Task queue
//!
//! At-least-once message queue with visibility-timeout acknowledgement. A
//! received message stays invisible until its timeout lapses, then becomes
//! receivable again unless it was acknowledged.

use async_trait::async_trait;
use sluice_core::domain::task::ContentProcessingTask;
use std::time::Duration;

use crate::error::StoreResult;

/// A received message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub message_id: String,

    /// Handle for this delivery; invalidated by the next delivery
    pub receipt: String,

    /// Serialized [`ContentProcessingTask`]
    pub body: String,

    /// Number of times this message has been received, this delivery included
    pub receive_count: u32,
}

/// Queue trait for task messages
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueues a task and returns its message ID
    async fn send(&self, task: &ContentProcessingTask) -> StoreResult<String>;

    /// Receives up to `max` visible messages and hides them for `visibility_timeout`
    async fn receive_batch(
        &self,
        max: usize,
        visibility_timeout: Duration,
    ) -> StoreResult<Vec<QueueMessage>>;

    /// Deletes a message
    async fn ack(&self, message: &QueueMessage) -> StoreResult<()>;

    /// Hides a message for `duration` from now; zero makes it visible immediately
    async fn extend_visibility(&self, message: &QueueMessage, duration: Duration)
    -> StoreResult<()>;
}
