//! Scheduler layer
//!
//! Source schedulers decide which pipelines are due, compete for their
//! leases, run discovery and turn every discovered item into a queued task.

pub mod source;

pub use source::{SchedulerSettings, SourceScheduler};
