//! Status helper enum mapping to the `job_statuses` lookup table.
//!
//! Each variant's discriminant matches the seed data in the
//! `create_research_jobs` migration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Status ID type matching SMALLINT in the database.
pub type StatusId = i16;

/// Research job lifecycle status.
///
/// Valid transitions: `Pending -> Running -> {Completed | Error}`.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending = 1,
    Running = 2,
    Completed = 3,
    Error = 4,
}

/// A `status_id` value with no matching [`JobStatus`] variant.
#[derive(Debug, thiserror::Error)]
#[error("Unknown job status id: {0}")]
pub struct UnknownStatus(pub StatusId);

/// A status name with no matching [`JobStatus`] variant.
#[derive(Debug, thiserror::Error)]
#[error("Unknown job status: {0}")]
pub struct UnknownStatusName(pub String);

impl JobStatus {
    /// Return the database status ID.
    pub fn id(self) -> StatusId {
        self as StatusId
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// `Completed` and `Error` accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Whether moving from `self` to `next` follows the lifecycle.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Error)
                | (Self::Pending, Self::Error)
        )
    }
}

impl From<JobStatus> for StatusId {
    fn from(value: JobStatus) -> Self {
        value as StatusId
    }
}

impl TryFrom<StatusId> for JobStatus {
    type Error = UnknownStatus;

    fn try_from(value: StatusId) -> Result<Self, UnknownStatus> {
        match value {
            1 => Ok(Self::Pending),
            2 => Ok(Self::Running),
            3 => Ok(Self::Completed),
            4 => Ok(Self::Error),
            other => Err(UnknownStatus(other)),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = UnknownStatusName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(UnknownStatusName(other.to_string())),
        }
    }
}
