//! In-memory task queue
//!
//! Visibility is evaluated against the injected clock, so tests can step
//! time past a visibility timeout to observe redelivery.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sluice_core::Clock;
use sluice_core::domain::task::ContentProcessingTask;
use std::cmp::Reverse;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::lock::chrono_ttl;
use crate::queue::{QueueMessage, TaskQueue};

struct Entry {
    message_id: String,
    body: String,
    priority: i32,
    visible_at: DateTime<Utc>,
    receive_count: u32,
    receipt: Option<String>,
}

/// In-memory implementation of [`TaskQueue`]
pub struct MemoryTaskQueue {
    clock: Arc<dyn Clock>,
    entries: Mutex<Vec<Entry>>,
}

impl MemoryTaskQueue {
    /// Creates an empty queue driven by `clock`
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(Vec::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of messages not yet acknowledged (visible or in flight)
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of messages receivable right now
    pub fn visible_len(&self) -> usize {
        let now = self.clock.now();
        self.entries().iter().filter(|e| e.visible_at <= now).count()
    }

    /// Decoded bodies of all unacknowledged messages, in enqueue order
    pub fn pending_tasks(&self) -> Vec<ContentProcessingTask> {
        self.entries()
            .iter()
            .filter_map(|e| ContentProcessingTask::from_json(&e.body).ok())
            .collect()
    }

    /// Enqueues a raw body at default priority, bypassing task serialization
    pub fn send_raw(&self, body: impl Into<String>) -> String {
        self.push(body.into(), 0)
    }

    fn push(&self, body: String, priority: i32) -> String {
        let message_id = Uuid::new_v4().to_string();
        self.entries().push(Entry {
            message_id: message_id.clone(),
            body,
            priority,
            visible_at: self.clock.now(),
            receive_count: 0,
            receipt: None,
        });
        message_id
    }

    fn find<'a>(entries: &'a mut [Entry], message: &QueueMessage) -> StoreResult<&'a mut Entry> {
        let entry = entries
            .iter_mut()
            .find(|e| e.message_id == message.message_id)
            .ok_or_else(|| StoreError::NotFound(format!("message {}", message.message_id)))?;

        if entry.receipt.as_deref() != Some(message.receipt.as_str()) {
            return Err(StoreError::StaleReceipt(message.message_id.clone()));
        }

        Ok(entry)
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn send(&self, task: &ContentProcessingTask) -> StoreResult<String> {
        let body = task.to_json()?;
        Ok(self.push(body, task.priority))
    }

    async fn receive_batch(
        &self,
        max: usize,
        visibility_timeout: Duration,
    ) -> StoreResult<Vec<QueueMessage>> {
        let now = self.clock.now();
        let hidden_until = now + chrono_ttl(visibility_timeout);
        let mut entries = self.entries();

        // Highest priority first, enqueue order within a priority
        let mut visible: Vec<usize> = (0..entries.len())
            .filter(|&i| entries[i].visible_at <= now)
            .collect();
        visible.sort_by_key(|&i| Reverse(entries[i].priority));
        visible.truncate(max);

        let messages = visible
            .into_iter()
            .map(|i| {
                let e = &mut entries[i];
                let receipt = Uuid::new_v4().to_string();
                e.visible_at = hidden_until;
                e.receive_count += 1;
                e.receipt = Some(receipt.clone());
                QueueMessage {
                    message_id: e.message_id.clone(),
                    receipt,
                    body: e.body.clone(),
                    receive_count: e.receive_count,
                }
            })
            .collect();

        Ok(messages)
    }

    async fn ack(&self, message: &QueueMessage) -> StoreResult<()> {
        let mut entries = self.entries();
        Self::find(&mut entries, message)?;
        entries.retain(|e| e.message_id != message.message_id);
        Ok(())
    }

    async fn extend_visibility(
        &self,
        message: &QueueMessage,
        duration: Duration,
    ) -> StoreResult<()> {
        let now = self.clock.now();
        let mut entries = self.entries();
        let entry = Self::find(&mut entries, message)?;
        entry.visible_at = now + chrono_ttl(duration);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::ManualClock;

    const VISIBILITY: Duration = Duration::from_secs(30);

    fn queue() -> (MemoryTaskQueue, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (MemoryTaskQueue::new(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_received_message_is_hidden_until_timeout() {
        let (queue, clock) = queue();
        queue.send_raw("{}");

        let batch = queue.receive_batch(10, VISIBILITY).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].receive_count, 1);
        assert!(queue.receive_batch(10, VISIBILITY).await.unwrap().is_empty());

        clock.advance(chrono::Duration::seconds(30));
        let redelivered = queue.receive_batch(10, VISIBILITY).await.unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].message_id, batch[0].message_id);
        assert_eq!(redelivered[0].receive_count, 2);
        assert_ne!(redelivered[0].receipt, batch[0].receipt);
    }

    #[tokio::test]
    async fn test_ack_deletes_message() {
        let (queue, clock) = queue();
        queue.send_raw("{}");

        let batch = queue.receive_batch(10, VISIBILITY).await.unwrap();
        queue.ack(&batch[0]).await.unwrap();
        assert!(queue.is_empty());

        clock.advance(chrono::Duration::seconds(60));
        assert!(queue.receive_batch(10, VISIBILITY).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_receipt_rejected() {
        let (queue, clock) = queue();
        queue.send_raw("{}");

        let first = queue.receive_batch(1, VISIBILITY).await.unwrap().remove(0);
        clock.advance(chrono::Duration::seconds(31));
        let second = queue.receive_batch(1, VISIBILITY).await.unwrap().remove(0);

        let err = queue.ack(&first).await.unwrap_err();
        assert!(matches!(err, StoreError::StaleReceipt(_)));
        assert_eq!(queue.len(), 1);

        queue.ack(&second).await.unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_batch_respects_max() {
        let (queue, _) = queue();
        for _ in 0..5 {
            queue.send_raw("{}");
        }

        assert_eq!(queue.receive_batch(3, VISIBILITY).await.unwrap().len(), 3);
        assert_eq!(queue.visible_len(), 2);
    }

    fn task(content_id: &str, priority: i32) -> ContentProcessingTask {
        ContentProcessingTask {
            task_id: Uuid::new_v4(),
            task_type: "content_processing".to_string(),
            pipeline_id: Uuid::new_v4(),
            pipeline_name: "ingest".to_string(),
            execution_id: Uuid::new_v4(),
            content_id: content_id.to_string(),
            content_data: serde_json::json!({}),
            executed_input_executor: "poll".to_string(),
            priority,
            max_retries: 3,
            attempt_count: 0,
        }
    }

    #[tokio::test]
    async fn test_higher_priority_received_first() {
        let (queue, _) = queue();
        queue.send(&task("low", 1)).await.unwrap();
        queue.send(&task("plain", 0)).await.unwrap();
        queue.send(&task("high", 5)).await.unwrap();
        queue.send(&task("low-2", 1)).await.unwrap();

        let content_ids = |batch: Vec<QueueMessage>| -> Vec<String> {
            batch
                .iter()
                .map(|m| ContentProcessingTask::from_json(&m.body).unwrap().content_id)
                .collect()
        };

        let first = queue.receive_batch(3, VISIBILITY).await.unwrap();
        assert_eq!(content_ids(first), vec!["high", "low", "low-2"]);

        let rest = queue.receive_batch(10, VISIBILITY).await.unwrap();
        assert_eq!(content_ids(rest), vec!["plain"]);
    }

    #[tokio::test]
    async fn test_extend_visibility() {
        let (queue, clock) = queue();
        queue.send_raw("{}");
        let msg = queue.receive_batch(1, VISIBILITY).await.unwrap().remove(0);

        clock.advance(chrono::Duration::seconds(20));
        queue
            .extend_visibility(&msg, Duration::from_secs(30))
            .await
            .unwrap();
        clock.advance(chrono::Duration::seconds(20));
        assert_eq!(queue.visible_len(), 0);

        // Zero releases the message immediately
        queue.extend_visibility(&msg, Duration::ZERO).await.unwrap();
        assert_eq!(queue.visible_len(), 1);
    }
}
