//! Shared domain types for the Delve research job service.
//!
//! Kept dependency-light so every other workspace crate can use it.

pub mod error;
pub mod job_events;
pub mod research;
pub mod types;
