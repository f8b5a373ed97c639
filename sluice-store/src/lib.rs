//! Sluice Store
//!
//! Capability interfaces over the shared document store and task queue, and
//! their backends.
//!
//! This crate contains:
//! - Store traits: locks, schedules, pipelines, executions, task queue
//! - Lock manager: leased mutual exclusion with fencing tokens
//! - PostgreSQL backend: the deployment backend (one pool, all collections)
//! - In-memory backend: single-process backend used by tests and embedding

pub mod db;
pub mod error;
pub mod execution;
pub mod lock;
pub mod memory;
pub mod pipeline;
pub mod postgres;
pub mod queue;
pub mod schedule;

// Re-export traits
pub use execution::ExecutionStore;
pub use lock::{LockManager, LockStore};
pub use pipeline::PipelineStore;
pub use queue::{QueueMessage, TaskQueue};
pub use schedule::ScheduleStore;

// Re-export implementations
pub use error::{StoreError, StoreResult};
pub use memory::{MemoryStore, MemoryTaskQueue};
pub use postgres::{PgStore, PgTaskQueue};
