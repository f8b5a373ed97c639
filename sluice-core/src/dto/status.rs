//! Engine status DTOs
//!
//! Read-only view of the supervisor's worker pools.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whole-engine status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub running: bool,
    pub processing_workers: PoolStatus,
    pub source_workers: PoolStatus,
}

/// Status of one worker pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Number of workers the pool should have
    pub configured: usize,

    /// Number of workers currently alive
    pub active: usize,

    pub workers: Vec<WorkerStatus>,
}

/// Liveness of a single worker process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    /// Stable slot identifier (e.g., "processing-0")
    pub id: String,

    /// OS process id of the current incarnation
    pub pid: Option<u32>,

    pub alive: bool,

    /// How many times this slot has been respawned
    pub restarts: u32,

    /// When the current incarnation was started
    pub started_at: Option<DateTime<Utc>>,
}

/// Kind of worker process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerKind {
    Source,
    Processing,
}

impl PoolStatus {
    pub fn new(configured: usize, workers: Vec<WorkerStatus>) -> Self {
        let active = workers.iter().filter(|w| w.alive).count();
        Self {
            configured,
            active,
            workers,
        }
    }
}

impl WorkerKind {
    /// Subcommand the engine binary is re-executed with
    pub fn subcommand(&self) -> &'static str {
        match self {
            WorkerKind::Source => "source-worker",
            WorkerKind::Processing => "processing-worker",
        }
    }

    /// Prefix of slot identifiers in this pool
    pub fn slot_prefix(&self) -> &'static str {
        match self {
            WorkerKind::Source => "source",
            WorkerKind::Processing => "processing",
        }
    }
}

impl std::fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerKind::Source => write!(f, "Source"),
            WorkerKind::Processing => write!(f, "Processing"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_status_counts_alive_workers() {
        let worker = |id: &str, alive: bool| WorkerStatus {
            id: id.to_string(),
            pid: Some(42),
            alive,
            restarts: 0,
            started_at: None,
        };
        let pool = PoolStatus::new(3, vec![worker("processing-0", true), worker("processing-1", false)]);
        assert_eq!(pool.configured, 3);
        assert_eq!(pool.active, 1);
    }

    #[test]
    fn test_status_json_shape() {
        let status = EngineStatus {
            running: true,
            processing_workers: PoolStatus::new(0, vec![]),
            source_workers: PoolStatus::new(0, vec![]),
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["running"], true);
        assert!(value["processing_workers"]["workers"].is_array());
        assert_eq!(value["source_workers"]["configured"], 0);
    }
}
