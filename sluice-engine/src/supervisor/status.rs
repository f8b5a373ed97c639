//! Shared status view
//!
//! Written by the supervisor loop after every liveness check, read by the
//! status API.

use sluice_core::dto::status::{EngineStatus, PoolStatus};
use std::sync::{Arc, RwLock};

/// Latest published [`EngineStatus`]
#[derive(Debug, Clone)]
pub struct StatusBoard {
    inner: Arc<RwLock<EngineStatus>>,
}

impl StatusBoard {
    /// Creates a board for pools that have not started yet
    pub fn new(num_source_workers: usize, num_processing_workers: usize) -> Self {
        let status = EngineStatus {
            running: false,
            processing_workers: PoolStatus::new(num_processing_workers, Vec::new()),
            source_workers: PoolStatus::new(num_source_workers, Vec::new()),
        };

        Self {
            inner: Arc::new(RwLock::new(status)),
        }
    }

    pub fn snapshot(&self) -> EngineStatus {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn publish(&self, status: EngineStatus) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = status;
    }
}
