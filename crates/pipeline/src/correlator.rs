//! Per-job tracing span and correlation id.

use delve_core::research::SummaryFormat;
use delve_core::types::JobId;
use tracing::Span;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
#[error("Correlation unavailable: {0}")]
pub struct CorrelatorError(pub String);

/// The span bracketing one job execution.
#[derive(Debug, Clone)]
pub struct Correlation {
    pub span: Span,
    /// 32 lowercase hex characters, when one could be assigned.
    pub trace_id: Option<String>,
}

impl Correlation {
    /// Used when the correlator fails: no span, no trace id.
    pub fn detached() -> Self {
        Self {
            span: Span::none(),
            trace_id: None,
        }
    }
}

/// Opens the correlation span for a job.
pub trait Correlator: Send + Sync {
    fn open(
        &self,
        job_id: JobId,
        query: &str,
        summary_format: SummaryFormat,
    ) -> Result<Correlation, CorrelatorError>;
}

/// Generates a fresh trace id and records it on a `research_job` span.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpanCorrelator;

impl Correlator for SpanCorrelator {
    fn open(
        &self,
        job_id: JobId,
        query: &str,
        summary_format: SummaryFormat,
    ) -> Result<Correlation, CorrelatorError> {
        let trace_id = Uuid::new_v4().simple().to_string();
        let span = tracing::info_span!(
            "research_job",
            job_id = %job_id,
            query = %query,
            summary_format = %summary_format,
            trace_id = %trace_id,
        );
        Ok(Correlation {
            span,
            trace_id: Some(trace_id),
        })
    }
}

/// Open a correlation, degrading to [`Correlation::detached`] on failure.
pub fn open_or_detached(
    correlator: &dyn Correlator,
    job_id: JobId,
    query: &str,
    summary_format: SummaryFormat,
) -> Correlation {
    match correlator.open(job_id, query, summary_format) {
        Ok(correlation) => correlation,
        Err(e) => {
            tracing::warn!(job_id = %job_id, error = %e, "Running job without correlation id");
            Correlation::detached()
        }
    }
}
