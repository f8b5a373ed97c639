//! Data Transfer Objects
//!
//! This module contains DTOs exchanged over the engine's status API
//! (supervisor, client, CLI).

pub mod status;
