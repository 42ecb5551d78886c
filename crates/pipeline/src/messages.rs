//! JSON frames pushed over a job's live channel.

use delve_core::job_events::{
    MSG_TYPE_COMPLETE, MSG_TYPE_ERROR, MSG_TYPE_LOG, MSG_TYPE_PONG, MSG_TYPE_PROGRESS,
    MSG_TYPE_STATUS,
};
use delve_core::types::{JobId, Timestamp};
use delve_db::models::job::Job;
use delve_db::models::status::JobStatus;
use serde::{Deserialize, Serialize};

/// One message on a job's live channel, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LiveMessage {
    /// Snapshot of a non-terminal job, sent once on attach.
    Status {
        job_id: JobId,
        status: JobStatus,
        progress: Option<String>,
        logs: Vec<String>,
    },
    Progress {
        job_id: JobId,
        status: JobStatus,
        progress: String,
        trace_id: Option<String>,
    },
    /// A captured output line. Only ever travels through the job's queue.
    Log {
        job_id: JobId,
        message: String,
        timestamp: Timestamp,
    },
    Complete {
        job_id: JobId,
        status: JobStatus,
        result: Option<serde_json::Value>,
        logs: Vec<String>,
        trace_id: Option<String>,
    },
    Error {
        job_id: JobId,
        status: JobStatus,
        error: String,
        logs: Vec<String>,
        trace_id: Option<String>,
    },
    Pong {
        data: String,
    },
}

impl LiveMessage {
    pub fn log(job_id: JobId, message: impl Into<String>) -> Self {
        Self::Log {
            job_id,
            message: message.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn progress(job_id: JobId, progress: impl Into<String>, trace_id: Option<String>) -> Self {
        Self::Progress {
            job_id,
            status: JobStatus::Running,
            progress: progress.into(),
            trace_id,
        }
    }

    /// The message an observer gets when attaching to `job`.
    ///
    /// Terminal jobs replay their stored outcome; anything else gets a
    /// status snapshot.
    pub fn replay(job: &Job) -> Self {
        match job.status {
            JobStatus::Completed => Self::Complete {
                job_id: job.job_id,
                status: job.status,
                result: job.result.clone(),
                logs: job.log_lines(),
                trace_id: job.trace_id.clone(),
            },
            JobStatus::Error => Self::Error {
                job_id: job.job_id,
                status: job.status,
                error: job.error.clone().unwrap_or_default(),
                logs: job.log_lines(),
                trace_id: job.trace_id.clone(),
            },
            JobStatus::Pending | JobStatus::Running => Self::Status {
                job_id: job.job_id,
                status: job.status,
                progress: job.progress.clone(),
                logs: job.log_lines(),
            },
        }
    }

    /// Wire value of the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => MSG_TYPE_STATUS,
            Self::Progress { .. } => MSG_TYPE_PROGRESS,
            Self::Log { .. } => MSG_TYPE_LOG,
            Self::Complete { .. } => MSG_TYPE_COMPLETE,
            Self::Error { .. } => MSG_TYPE_ERROR,
            Self::Pong { .. } => MSG_TYPE_PONG,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }

    pub fn to_json(&self) -> String {
        // Every variant is plain data; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
