//! Schedule domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-pipeline next-run bookkeeping
///
/// `next_due_at` only moves forward after a completed discovery run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub pipeline_id: Uuid,
    pub polling_interval_secs: u64,
    pub next_due_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_outcome: Option<RunOutcome>,
    pub last_error: Option<String>,
    /// Fencing token of the lease that last wrote this record (0 if never run)
    pub fencing_token: i64,
}

/// Outcome of a discovery run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    Success,
    Failed,
}

impl ScheduleRecord {
    /// A fresh record, due immediately
    pub fn new(pipeline_id: Uuid, polling_interval_secs: u64, now: DateTime<Utc>) -> Self {
        Self {
            pipeline_id,
            polling_interval_secs,
            next_due_at: now,
            last_run_at: None,
            last_run_outcome: None,
            last_error: None,
            fencing_token: 0,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_due_at <= now
    }

    pub fn polling_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.polling_interval_secs as i64)
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Success => write!(f, "Success"),
            RunOutcome::Failed => write!(f, "Failed"),
        }
    }
}
