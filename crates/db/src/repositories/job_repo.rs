//! Repository for the `research_jobs` table.
//!
//! Uses `JobStatus` from `models::status` for every status literal.
//! Lifecycle rules are enforced by the orchestrator; these statements
//! write what they are given.

use delve_core::types::JobId;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::job::{Job, JobListQuery, NewJob, TerminalUpdate};
use crate::models::status::JobStatus;

/// Column list for `research_jobs` queries.
const COLUMNS: &str = "\
    job_id, trace_id, query, summary_format, selected_agents, status_id, \
    progress, result, research_data, error, logs, \
    created_at, updated_at, completed_at";

/// Provides CRUD operations for research jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new pending job.
    pub async fn create(pool: &PgPool, job_id: JobId, input: &NewJob) -> Result<Job, sqlx::Error> {
        let query = format!(
            "INSERT INTO research_jobs \
                 (job_id, query, summary_format, selected_agents, status_id, progress) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(job_id)
            .bind(&input.query)
            .bind(input.summary_format.as_str())
            .bind(input.selected_agents.as_ref().map(Json))
            .bind(JobStatus::Pending.id())
            .bind("Job created, waiting to start...")
            .fetch_one(pool)
            .await
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &PgPool, job_id: JobId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM research_jobs WHERE job_id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(job_id)
            .fetch_optional(pool)
            .await
    }

    /// Move a job to `running`, recording its progress line and, if this is
    /// the first time one is known, its trace id.
    ///
    /// Returns `false` when no row matched.
    pub async fn mark_running(
        pool: &PgPool,
        job_id: JobId,
        progress: &str,
        trace_id: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE research_jobs \
             SET status_id = $2, progress = $3, \
                 trace_id = COALESCE(trace_id, $4), updated_at = NOW() \
             WHERE job_id = $1",
        )
        .bind(job_id)
        .bind(JobStatus::Running.id())
        .bind(progress)
        .bind(trace_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Overwrite the progress line of a running job.
    pub async fn update_progress(
        pool: &PgPool,
        job_id: JobId,
        progress: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE research_jobs SET progress = $2, updated_at = NOW() WHERE job_id = $1",
        )
        .bind(job_id)
        .bind(progress)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Write the terminal state of a job in one statement.
    ///
    /// `completed_at` keeps its first value if it was already stamped.
    pub async fn finish(
        pool: &PgPool,
        job_id: JobId,
        update: &TerminalUpdate,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE research_jobs \
             SET status_id = $2, progress = $3, \
                 result = COALESCE($4, result), \
                 research_data = COALESCE($5, research_data), \
                 error = $6, logs = $7, \
                 completed_at = COALESCE(completed_at, NOW()), \
                 updated_at = NOW() \
             WHERE job_id = $1",
        )
        .bind(job_id)
        .bind(update.status.id())
        .bind(&update.progress)
        .bind(&update.result)
        .bind(&update.research_data)
        .bind(&update.error)
        .bind(Json(&update.logs))
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List jobs newest first with optional status filter and pagination.
    pub async fn list(pool: &PgPool, params: &JobListQuery) -> Result<Vec<Job>, sqlx::Error> {
        let status_id = params.status.map(JobStatus::id);
        let query = format!(
            "SELECT {COLUMNS} FROM research_jobs \
             WHERE ($1::SMALLINT IS NULL OR status_id = $1) \
             ORDER BY created_at DESC \
             LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(status_id)
            .bind(params.page_size())
            .bind(params.offset())
            .fetch_all(pool)
            .await
    }

    /// Count jobs matching the same status filter as [`JobRepo::list`].
    pub async fn count(pool: &PgPool, params: &JobListQuery) -> Result<i64, sqlx::Error> {
        let status_id = params.status.map(JobStatus::id);
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM research_jobs \
             WHERE ($1::SMALLINT IS NULL OR status_id = $1)",
        )
        .bind(status_id)
        .fetch_one(pool)
        .await
    }
}
