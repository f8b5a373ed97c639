//! PostgreSQL task queue
//!
//! A table-backed at-least-once queue. Receiving claims rows with
//! `FOR UPDATE SKIP LOCKED`, so concurrent workers never receive the same
//! visible message twice, and pushes `visible_at` forward by the visibility
//! timeout. Visibility is judged by the database clock.

use async_trait::async_trait;
use sluice_core::domain::task::ContentProcessingTask;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::queue::{QueueMessage, TaskQueue};

/// PostgreSQL implementation of [`TaskQueue`]
#[derive(Debug, Clone)]
pub struct PgTaskQueue {
    pool: PgPool,
}

impl PgTaskQueue {
    /// Creates a queue over an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskQueue for PgTaskQueue {
    async fn send(&self, task: &ContentProcessingTask) -> StoreResult<String> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO task_queue (id, body, priority, enqueued_at, visible_at)
            VALUES ($1, $2, $3, now(), now())
            "#,
        )
        .bind(id)
        .bind(task.to_json()?)
        .bind(task.priority)
        .execute(&self.pool)
        .await?;

        Ok(id.to_string())
    }

    async fn receive_batch(
        &self,
        max: usize,
        visibility_timeout: Duration,
    ) -> StoreResult<Vec<QueueMessage>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            UPDATE task_queue
            SET visible_at = now() + make_interval(secs => $2),
                receive_count = receive_count + 1,
                receipt = gen_random_uuid()
            WHERE id IN (
                SELECT id FROM task_queue
                WHERE visible_at <= now()
                ORDER BY priority DESC, enqueued_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, receipt, body, receive_count
            "#,
        )
        .bind(max as i64)
        .bind(visibility_timeout.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn ack(&self, message: &QueueMessage) -> StoreResult<()> {
        let (id, receipt) = parse_handles(message)?;

        let result = sqlx::query("DELETE FROM task_queue WHERE id = $1 AND receipt = $2")
            .bind(id)
            .bind(receipt)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::StaleReceipt(message.message_id.clone()));
        }

        Ok(())
    }

    async fn extend_visibility(
        &self,
        message: &QueueMessage,
        duration: Duration,
    ) -> StoreResult<()> {
        let (id, receipt) = parse_handles(message)?;

        let result = sqlx::query(
            r#"
            UPDATE task_queue
            SET visible_at = now() + make_interval(secs => $3)
            WHERE id = $1 AND receipt = $2
            "#,
        )
        .bind(id)
        .bind(receipt)
        .bind(duration.as_secs_f64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::StaleReceipt(message.message_id.clone()));
        }

        Ok(())
    }
}

fn parse_handles(message: &QueueMessage) -> StoreResult<(Uuid, Uuid)> {
    let id = Uuid::parse_str(&message.message_id)
        .map_err(|_| StoreError::NotFound(format!("message {}", message.message_id)))?;
    let receipt = Uuid::parse_str(&message.receipt)
        .map_err(|_| StoreError::StaleReceipt(message.message_id.clone()))?;
    Ok((id, receipt))
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    receipt: Uuid,
    body: String,
    receive_count: i32,
}

impl From<MessageRow> for QueueMessage {
    fn from(row: MessageRow) -> Self {
        QueueMessage {
            message_id: row.id.to_string(),
            receipt: row.receipt.to_string(),
            body: row.body,
            receive_count: row.receive_count.max(0) as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, receipt: &str) -> QueueMessage {
        QueueMessage {
            message_id: id.to_string(),
            receipt: receipt.to_string(),
            body: String::new(),
            receive_count: 1,
        }
    }

    #[test]
    fn test_parse_handles() {
        let id = Uuid::new_v4();
        let receipt = Uuid::new_v4();
        let parsed = parse_handles(&message(&id.to_string(), &receipt.to_string())).unwrap();
        assert_eq!(parsed, (id, receipt));

        assert!(parse_handles(&message("nope", &receipt.to_string())).is_err());
        assert!(matches!(
            parse_handles(&message(&id.to_string(), "nope")),
            Err(StoreError::StaleReceipt(_))
        ));
    }
}
