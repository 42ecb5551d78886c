//! The compute body seam.
//!
//! A [`CrewFactory`] assembles a [`ResearchCrew`] for one job; the crew's
//! blocking [`ResearchCrew::run`] produces a loosely-structured JSON
//! result that the normalizer turns into the stored shape.

use std::fmt;

use chrono::Datelike;
use delve_core::research::SummaryFormat;
use delve_core::types::JobId;
use serde::Serialize;

pub use crate::sink::CrewOutput;

/// Inputs handed to the crew for one job.
#[derive(Debug, Clone, Serialize)]
pub struct CrewInputs {
    pub job_id: JobId,
    pub query: String,
    pub summary_format: SummaryFormat,
    pub current_year: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_agents: Option<Vec<String>>,
}

impl CrewInputs {
    pub fn new(
        job_id: JobId,
        query: impl Into<String>,
        summary_format: SummaryFormat,
        selected_agents: Option<Vec<String>>,
    ) -> Self {
        Self {
            job_id,
            query: query.into(),
            summary_format,
            current_year: chrono::Utc::now().year().to_string(),
            selected_agents,
        }
    }
}

/// Coarse failure category used to pick a recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The body gave up waiting on something.
    Timeout,
    /// An upstream model or tool call failed.
    Upstream,
    /// The body itself failed.
    Internal,
    /// The body panicked on its worker thread.
    Panic,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Upstream => "upstream",
            Self::Internal => "internal",
            Self::Panic => "panic",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed crew build or run.
///
/// Displays as the bare message, which is what gets stored on the job.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct BodyError {
    pub class: ErrorClass,
    pub message: String,
    /// Whatever the body produced before failing.
    pub partial: Option<serde_json::Value>,
}

impl BodyError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            partial: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Timeout, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Upstream, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Internal, message)
    }

    pub fn panicked(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Panic, message)
    }

    pub fn with_partial(mut self, partial: serde_json::Value) -> Self {
        self.partial = Some(partial);
        self
    }
}

/// A research crew ready to run one job.
///
/// `run` is blocking and executes on the blocking thread pool. Anything
/// the crew wants observers to see goes to `output`.
pub trait ResearchCrew: Send + Sync {
    fn run(
        &self,
        inputs: &CrewInputs,
        output: &mut CrewOutput,
    ) -> Result<serde_json::Value, BodyError>;
}

/// Builds a crew for a job. A build error fails the job before any
/// output capture starts.
pub trait CrewFactory: Send + Sync {
    fn build(&self, inputs: &CrewInputs) -> Result<Box<dyn ResearchCrew>, BodyError>;
}
