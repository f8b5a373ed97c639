//! Core domain types
//!
//! This module contains the core domain structures used across Sluice crates.
//! These types are shared between the store (for persistence) and the engine
//! (for scheduling and execution).

pub mod content;
pub mod execution;
pub mod lock;
pub mod pipeline;
pub mod schedule;
pub mod task;
