//! PostgreSQL backend
//!
//! Every collection lives in the same database and is reached through one
//! shared pool. Conditional writes are single statements, so concurrent
//! engine processes on any machine observe the same lock and queue state.

mod execution;
mod lock;
mod pipeline;
mod queue;
mod schedule;

pub use queue::PgTaskQueue;

use sqlx::PgPool;

/// PostgreSQL implementation of the lock, schedule, pipeline and execution stores
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a store over an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
