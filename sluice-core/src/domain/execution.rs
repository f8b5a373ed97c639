//! Execution domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Processing record for one (pipeline, content item) task
///
/// Keyed by `execution_id`. Redeliveries of a task update the same record;
/// consumers de-duplicate by `(pipeline_id, content_id, execution_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: Uuid,
    pub task_id: Uuid,
    pub pipeline_id: Uuid,
    pub content_id: String,
    pub status: ExecutionStatus,
    /// 1-based attempt number of the latest delivery
    pub attempt: u32,
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
    /// Append-only transition log
    pub events: Vec<ExecutionEvent>,
}

/// Execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// One entry of the execution event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub timestamp: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub message: Option<String>,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "Pending",
            ExecutionStatus::Running => "Running",
            ExecutionStatus::Completed => "Completed",
            ExecutionStatus::Failed => "Failed",
            ExecutionStatus::Cancelled => "Cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(ExecutionStatus::Pending),
            "Running" => Some(ExecutionStatus::Running),
            "Completed" => Some(ExecutionStatus::Completed),
            "Failed" => Some(ExecutionStatus::Failed),
            "Cancelled" => Some(ExecutionStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ExecutionEvent {
    pub fn new(timestamp: DateTime<Utc>, status: ExecutionStatus, message: Option<String>) -> Self {
        Self {
            timestamp,
            status,
            message,
        }
    }
}
