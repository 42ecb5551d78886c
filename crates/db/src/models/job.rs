//! Research job entity models and DTOs.

use delve_core::research::SummaryFormat;
use delve_core::types::{JobId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

use super::status::JobStatus;

/// A row from the `research_jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub job_id: JobId,
    pub trace_id: Option<String>,
    pub query: String,
    #[sqlx(try_from = "String")]
    pub summary_format: SummaryFormat,
    pub selected_agents: Option<Json<Vec<String>>>,
    #[sqlx(rename = "status_id", try_from = "i16")]
    pub status: JobStatus,
    pub progress: Option<String>,
    pub result: Option<serde_json::Value>,
    pub research_data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub logs: Option<Json<Vec<String>>>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl Job {
    /// Stored transcript, or an empty list before the terminal write.
    pub fn log_lines(&self) -> Vec<String> {
        self.logs.as_ref().map(|l| l.0.clone()).unwrap_or_default()
    }
}

/// Input for creating a pending job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub query: String,
    pub summary_format: SummaryFormat,
    pub selected_agents: Option<Vec<String>>,
}

/// Fields written together when a job reaches `completed` or `error`.
///
/// Applied as a single statement; `completed_at` is only stamped the
/// first time.
#[derive(Debug, Clone)]
pub struct TerminalUpdate {
    pub status: JobStatus,
    pub progress: String,
    pub result: Option<serde_json::Value>,
    pub research_data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub logs: Vec<String>,
}

/// Query parameters for `GET /api/jobs`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobListQuery {
    /// 1-based page number. Defaults to 1.
    pub page: Option<i64>,
    /// Page size. Defaults to 20, capped at 100.
    pub page_size: Option<i64>,
    /// Filter by status name (e.g. `completed`).
    pub status: Option<JobStatus>,
}

/// Maximum page size for job history.
pub const MAX_PAGE_SIZE: i64 = 100;

/// Default page size for job history.
pub const DEFAULT_PAGE_SIZE: i64 = 20;

impl JobListQuery {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn page_size(&self) -> i64 {
        self.page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.page_size()
    }
}

/// One page of job history, newest first.
#[derive(Debug, Serialize)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_query_defaults() {
        let q = JobListQuery::default();
        assert_eq!(q.page(), 1);
        assert_eq!(q.page_size(), DEFAULT_PAGE_SIZE);
        assert_eq!(q.offset(), 0);
    }

    #[test]
    fn list_query_clamps_page_size_and_page() {
        let q = JobListQuery {
            page: Some(0),
            page_size: Some(5_000),
            status: None,
        };
        assert_eq!(q.page(), 1);
        assert_eq!(q.page_size(), MAX_PAGE_SIZE);
    }

    #[test]
    fn list_query_offset_uses_page() {
        let q = JobListQuery {
            page: Some(3),
            page_size: Some(10),
            status: None,
        };
        assert_eq!(q.offset(), 20);
    }
}
