//! Sluice Core
//!
//! Core types and abstractions for the Sluice pipeline-triggering engine.
//!
//! This crate contains:
//! - Domain types: Core business entities (Pipeline, Schedule, Lease, Task, Execution)
//! - DTOs: Data transfer objects for the engine status surface
//! - Clock: Time source shared by every lease and schedule decision

pub mod clock;
pub mod domain;
pub mod dto;

pub use clock::{Clock, ManualClock, SystemClock};
