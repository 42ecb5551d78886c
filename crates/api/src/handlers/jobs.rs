//! Handlers for reading research jobs.

use axum::extract::{Path, Query, State};
use axum::Json;
use delve_core::error::CoreError;
use delve_core::types::JobId;
use delve_db::models::job::{Job, JobListQuery, JobPage};
use delve_db::models::status::JobStatus;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Parse a path segment as a job id.
pub fn parse_job_id(raw: &str) -> AppResult<JobId> {
    JobId::parse_str(raw).map_err(|_| AppError::BadRequest("Invalid job ID format".into()))
}

/// Fetch a job or fail with `NotFound`.
pub async fn find_job(state: &AppState, job_id: JobId) -> AppResult<Job> {
    state
        .store
        .find(job_id)
        .await?
        .ok_or_else(|| {
            AppError::Core(CoreError::NotFound {
                entity: "Job",
                id: job_id.to_string(),
            })
        })
}

/// GET /api/jobs/{job_id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<Job>> {
    let job_id = parse_job_id(&job_id)?;
    Ok(Json(find_job(&state, job_id).await?))
}

/// Raw query string for `GET /api/jobs`. An empty `status` means no filter.
#[derive(Debug, Default, Deserialize)]
pub struct ListJobsParams {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub status: Option<String>,
}

impl ListJobsParams {
    pub fn into_query(self) -> AppResult<JobListQuery> {
        let status = match self.status.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(name) => Some(
                name.parse::<JobStatus>()
                    .map_err(|e| AppError::BadRequest(e.to_string()))?,
            ),
        };
        Ok(JobListQuery {
            page: self.page,
            page_size: self.page_size,
            status,
        })
    }
}

/// GET /api/jobs?page=&page_size=&status=
///
/// Newest first. `page_size` defaults to 20 and is capped at 100.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListJobsParams>,
) -> AppResult<Json<JobPage>> {
    let query = params.into_query()?;
    Ok(Json(state.store.list(&query).await?))
}
