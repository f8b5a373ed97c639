//! In-memory backend
//!
//! Single-process implementations of every store trait. They coordinate
//! tasks within one process only and are used by tests and embedded setups.

mod queue;
mod store;

pub use queue::MemoryTaskQueue;
pub use store::MemoryStore;
