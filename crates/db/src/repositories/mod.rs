//! Postgres repositories.
//!
//! Each repository is a zero-sized struct with associated async functions
//! taking `&PgPool`, so callers choose the pool and transaction scope.

pub mod job_repo;

pub use job_repo::JobRepo;
