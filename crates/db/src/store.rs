//! The [`JobStore`] seam between the job pipeline and durable storage.

use async_trait::async_trait;
use delve_core::types::JobId;

use crate::models::job::{Job, JobListQuery, JobPage, NewJob, TerminalUpdate};
use crate::repositories::JobRepo;
use crate::DbPool;

/// Error type for job store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying database call failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The store refused the operation without a database error.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Durable CRUD over research jobs.
///
/// Update methods return `Ok(false)` when the job does not exist. Each
/// call is a single atomic write; callers own lifecycle validation.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, input: &NewJob) -> Result<Job, StoreError>;

    async fn find(&self, job_id: JobId) -> Result<Option<Job>, StoreError>;

    async fn list(&self, query: &JobListQuery) -> Result<JobPage, StoreError>;

    async fn mark_running(
        &self,
        job_id: JobId,
        progress: &str,
        trace_id: Option<&str>,
    ) -> Result<bool, StoreError>;

    async fn update_progress(&self, job_id: JobId, progress: &str) -> Result<bool, StoreError>;

    async fn finish(&self, job_id: JobId, update: &TerminalUpdate) -> Result<bool, StoreError>;

    /// Verify the backing storage is reachable.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// [`JobStore`] backed by Postgres through [`JobRepo`].
#[derive(Clone)]
pub struct PgJobStore {
    pool: DbPool,
}

impl PgJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, input: &NewJob) -> Result<Job, StoreError> {
        Ok(JobRepo::create(&self.pool, JobId::new_v4(), input).await?)
    }

    async fn find(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(JobRepo::find_by_id(&self.pool, job_id).await?)
    }

    async fn list(&self, query: &JobListQuery) -> Result<JobPage, StoreError> {
        let total = JobRepo::count(&self.pool, query).await?;
        let jobs = JobRepo::list(&self.pool, query).await?;
        Ok(JobPage {
            jobs,
            total,
            page: query.page(),
            page_size: query.page_size(),
        })
    }

    async fn mark_running(
        &self,
        job_id: JobId,
        progress: &str,
        trace_id: Option<&str>,
    ) -> Result<bool, StoreError> {
        Ok(JobRepo::mark_running(&self.pool, job_id, progress, trace_id).await?)
    }

    async fn update_progress(&self, job_id: JobId, progress: &str) -> Result<bool, StoreError> {
        Ok(JobRepo::update_progress(&self.pool, job_id, progress).await?)
    }

    async fn finish(&self, job_id: JobId, update: &TerminalUpdate) -> Result<bool, StoreError> {
        Ok(JobRepo::finish(&self.pool, job_id, update).await?)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(crate::health_check(&self.pool).await?)
    }
}
