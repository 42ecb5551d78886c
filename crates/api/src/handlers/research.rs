//! Handler for submitting research jobs.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use delve_core::research::{validate_query, SummaryFormat};
use delve_db::models::job::NewJob;
use serde::Deserialize;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::response::JobSubmitted;
use crate::state::AppState;

/// Body of `POST /api/research`.
#[derive(Debug, Deserialize, Validate)]
pub struct ResearchRequest {
    #[validate(length(max = 4000, message = "Query is too long"))]
    pub query: String,
    /// `brief`, `detailed` or `comprehensive`. Defaults to `detailed`.
    pub summary_format: Option<String>,
    #[validate(length(max = 16, message = "Too many selected agents"))]
    pub selected_agents: Option<Vec<String>>,
}

impl ResearchRequest {
    /// Validate and convert into a store input.
    pub fn into_new_job(self) -> AppResult<NewJob> {
        self.validate()
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        validate_query(&self.query)?;

        let summary_format = match self.summary_format.as_deref() {
            None => SummaryFormat::default(),
            Some(raw) => raw.parse::<SummaryFormat>()?,
        };
        let selected_agents = self.selected_agents.map(|agents| {
            agents
                .into_iter()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect::<Vec<_>>()
        });

        Ok(NewJob {
            query: self.query.trim().to_string(),
            summary_format,
            selected_agents,
        })
    }
}

/// POST /api/research
///
/// Create a pending job and start it in the background. Returns 201 with
/// the job id; progress is observed over `/ws/{job_id}` or by polling.
pub async fn submit_research(
    State(state): State<AppState>,
    Json(input): Json<ResearchRequest>,
) -> AppResult<impl IntoResponse> {
    let new_job = input.into_new_job()?;
    let job = state.orchestrator.submit(new_job).await?;

    Ok((StatusCode::CREATED, Json(JobSubmitted::pending(job.job_id))))
}
