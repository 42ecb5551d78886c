//! Response bodies shared by API handlers.

use delve_core::types::JobId;
use delve_db::models::status::JobStatus;
use serde::Serialize;

/// Body of `201 Created` for `POST /api/research`.
#[derive(Debug, Serialize)]
pub struct JobSubmitted {
    pub job_id: JobId,
    pub status: JobStatus,
    pub message: String,
}

impl JobSubmitted {
    pub fn pending(job_id: JobId) -> Self {
        Self {
            job_id,
            status: JobStatus::Pending,
            message: "Research job created. Connect to the WebSocket for live updates.".into(),
        }
    }
}
