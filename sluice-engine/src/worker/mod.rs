//! Worker layer
//!
//! Processing workers pull task batches from the queue, execute the rest of
//! each task's pipeline through the pipeline runner, and record the outcome.

pub mod processor;
pub mod sink;

pub use processor::{ProcessingWorker, WorkerSettings};
pub use sink::TracingFailureSink;
