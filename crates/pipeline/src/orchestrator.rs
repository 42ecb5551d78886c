//! Drives one research job from `pending` to exactly one terminal state.
//!
//! [`JobOrchestrator::execute`] runs the stages in order: mark running,
//! build the crew, open the log queue and forwarder, run the body off the
//! async runtime, tear the queue down, normalize, then persist and push
//! the terminal outcome. A failure at any stage, including a panic, ends
//! in an `error` terminal write; the queue teardown runs either way.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use delve_core::research::SummaryFormat;
use delve_core::types::JobId;
use delve_db::models::job::{Job, NewJob, TerminalUpdate};
use delve_db::models::status::JobStatus;
use delve_db::{JobStore, StoreError};
use delve_events::bus::{EVENT_JOB_COMPLETED, EVENT_JOB_FAILED};
use delve_events::{EvaluationRequest, EventBus, PlatformEvent};
use futures::FutureExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::bridge::{panic_message, ExecutionBridge};
use crate::config::PipelineConfig;
use crate::correlator::{open_or_detached, Correlator, SpanCorrelator};
use crate::crew::{BodyError, CrewFactory, CrewInputs, ResearchCrew};
use crate::messages::LiveMessage;
use crate::normalizer::{normalize, read_report, Normalized};
use crate::queue::QueueRegistry;
use crate::recovery::RecoveryPolicy;
use crate::registry::LiveRegistry;
use crate::{forwarder, sink};

pub const PROGRESS_INITIALIZING: &str = "Initializing research crew...";
pub const PROGRESS_STARTING: &str = "Starting research task...";
pub const PROGRESS_PROCESSING: &str = "Research completed, processing results...";
pub const PROGRESS_COMPLETED: &str = "Research completed successfully!";

/// The immutable inputs of one job execution.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub job_id: JobId,
    pub query: String,
    pub summary_format: SummaryFormat,
    pub selected_agents: Option<Vec<String>>,
}

impl JobRequest {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.job_id,
            query: job.query.clone(),
            summary_format: job.summary_format,
            selected_agents: job.selected_agents.as_ref().map(|a| a.0.clone()),
        }
    }
}

/// Why a job ended in `error`.
#[derive(Debug)]
struct Failure {
    message: String,
    partial: Option<serde_json::Value>,
}

impl Failure {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            partial: None,
        }
    }
}

impl From<BodyError> for Failure {
    fn from(err: BodyError) -> Self {
        Self {
            message: err.message,
            partial: err.partial,
        }
    }
}

/// In-memory view of the job this execution owns.
struct JobRun {
    job_id: JobId,
    trace_id: Option<String>,
    status: JobStatus,
    logs: Vec<String>,
}

impl JobRun {
    /// Move to `next` if the lifecycle allows it.
    fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                job_id = %self.job_id,
                from = %self.status,
                to = %next,
                "Rejected job status transition",
            );
            return false;
        }
        self.status = next;
        true
    }
}

/// Runs research jobs and owns their background tasks.
#[derive(Clone)]
pub struct JobOrchestrator {
    store: Arc<dyn JobStore>,
    live: Arc<LiveRegistry>,
    queues: Arc<QueueRegistry>,
    crews: Arc<dyn CrewFactory>,
    correlator: Arc<dyn Correlator>,
    bridge: ExecutionBridge,
    events: Option<Arc<EventBus>>,
    tracker: TaskTracker,
    config: PipelineConfig,
}

impl JobOrchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        live: Arc<LiveRegistry>,
        crews: Arc<dyn CrewFactory>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            live,
            queues: Arc::new(QueueRegistry::new()),
            crews,
            correlator: Arc::new(SpanCorrelator),
            bridge: ExecutionBridge::default(),
            events: None,
            tracker: TaskTracker::new(),
            config,
        }
    }

    pub fn with_queues(mut self, queues: Arc<QueueRegistry>) -> Self {
        self.queues = queues;
        self
    }

    pub fn with_correlator(mut self, correlator: Arc<dyn Correlator>) -> Self {
        self.correlator = correlator;
        self
    }

    pub fn with_recovery(mut self, policy: RecoveryPolicy) -> Self {
        self.bridge = ExecutionBridge::new(policy);
        self
    }

    /// Publish job outcomes and evaluation requests on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn live(&self) -> &Arc<LiveRegistry> {
        &self.live
    }

    pub fn queues(&self) -> &Arc<QueueRegistry> {
        &self.queues
    }

    /// Tracks every job started by [`submit`](Self::submit).
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Create a pending job and start executing it in the background.
    pub async fn submit(&self, input: NewJob) -> Result<Job, StoreError> {
        let job = self.store.create(&input).await?;
        let request = JobRequest::from_job(&job);
        let orchestrator = self.clone();
        self.tracker
            .spawn(async move { orchestrator.execute(request).await });
        tracing::info!(job_id = %job.job_id, summary_format = %job.summary_format, "Research job submitted");
        Ok(job)
    }

    /// Execute a `pending` job to completion. Always ends with the
    /// terminal store write and the final live push.
    pub async fn execute(&self, request: JobRequest) {
        let correlation = open_or_detached(
            self.correlator.as_ref(),
            request.job_id,
            &request.query,
            request.summary_format,
        );
        let mut run = JobRun {
            job_id: request.job_id,
            trace_id: correlation.trace_id,
            status: JobStatus::Pending,
            logs: Vec::new(),
        };

        async {
            let outcome = match AssertUnwindSafe(self.run_stages(&request, &mut run))
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(panic) => {
                    self.queues.close(request.job_id).await;
                    Err(Failure::new(panic_message(panic)))
                }
            };
            self.finish(&request, &mut run, outcome).await;
        }
        .instrument(correlation.span)
        .await
    }

    async fn run_stages(
        &self,
        request: &JobRequest,
        run: &mut JobRun,
    ) -> Result<Normalized, Failure> {
        self.advance(run, PROGRESS_INITIALIZING).await;

        let inputs = CrewInputs::new(
            request.job_id,
            request.query.clone(),
            request.summary_format,
            request.selected_agents.clone(),
        );
        let crew = self
            .crews
            .build(&inputs)
            .map_err(|e| Failure::new(format!("Failed to initialize crew: {e}")))?;

        self.advance(run, PROGRESS_STARTING).await;

        let value = self.run_body(run, crew, inputs).await?;

        self.advance(run, PROGRESS_PROCESSING).await;

        let mut normalized = normalize(&value);
        normalized.result.report = read_report(&self.config.report_path);
        Ok(normalized)
    }

    /// Run the crew with output capture and forwarding in place.
    ///
    /// The queue and forwarder are fully torn down before this returns.
    async fn run_body(
        &self,
        run: &mut JobRun,
        crew: Box<dyn ResearchCrew>,
        inputs: CrewInputs,
    ) -> Result<serde_json::Value, BodyError> {
        let job_id = run.job_id;
        let (producer, queue) = self.queues.open(job_id, self.config.queue_capacity).await;
        let (guard, mut output) = sink::install(producer);

        let cancel = CancellationToken::new();
        let _cancel_on_unwind = cancel.clone().drop_guard();
        let mut forwarder = forwarder::spawn(
            job_id,
            queue,
            Arc::clone(&self.live),
            self.config.poll_interval,
            cancel.clone(),
        );

        let outcome = self
            .bridge
            .run_off_thread(move || crew.run(&inputs, &mut output))
            .await;

        guard.detach();
        run.logs = guard.logs();

        let joined = match tokio::time::timeout(self.config.drain_grace, &mut forwarder).await {
            Ok(joined) => joined,
            Err(_) => {
                tracing::debug!(job_id = %job_id, "Forwarder still draining, cancelling");
                cancel.cancel();
                forwarder.await
            }
        };
        match joined {
            Ok(forwarded) => tracing::debug!(job_id = %job_id, forwarded, "Forwarder finished"),
            Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Forwarder task failed"),
        }

        if let Some(stats) = self.queues.close(job_id).await {
            if stats.dropped() > 0 {
                tracing::warn!(
                    job_id = %job_id,
                    dropped = stats.dropped(),
                    enqueued = stats.enqueued(),
                    "Log queue overflowed; live observer missed lines",
                );
            }
        }

        outcome
    }

    /// Record a progress line, marking the job running on the first call.
    async fn advance(&self, run: &mut JobRun, progress: &str) {
        let written = if run.status == JobStatus::Pending && run.transition(JobStatus::Running) {
            self.store
                .mark_running(run.job_id, progress, run.trace_id.as_deref())
                .await
        } else {
            self.store.update_progress(run.job_id, progress).await
        };
        match written {
            Ok(true) => {}
            Ok(false) => tracing::warn!(job_id = %run.job_id, "Progress update matched no job"),
            Err(e) => tracing::error!(job_id = %run.job_id, error = %e, "Failed to persist progress"),
        }

        let message = LiveMessage::progress(run.job_id, progress, run.trace_id.clone());
        self.live.push(run.job_id, message).await;
    }

    async fn finish(
        &self,
        request: &JobRequest,
        run: &mut JobRun,
        outcome: Result<Normalized, Failure>,
    ) {
        let next = if outcome.is_ok() {
            JobStatus::Completed
        } else {
            JobStatus::Error
        };
        if !run.transition(next) {
            return;
        }

        let (update, message, normalized) = match outcome {
            Ok(normalized) => {
                let result = serde_json::to_value(&normalized.result).ok();
                let update = TerminalUpdate {
                    status: JobStatus::Completed,
                    progress: PROGRESS_COMPLETED.into(),
                    result: result.clone(),
                    research_data: serde_json::to_value(&normalized.research_data).ok(),
                    error: None,
                    logs: run.logs.clone(),
                };
                let message = LiveMessage::Complete {
                    job_id: run.job_id,
                    status: JobStatus::Completed,
                    result,
                    logs: run.logs.clone(),
                    trace_id: run.trace_id.clone(),
                };
                (update, message, Some(normalized))
            }
            Err(failure) => {
                tracing::error!(job_id = %run.job_id, error = %failure.message, "Research job failed");
                let partial = failure.partial.as_ref().map(normalize);
                let update = TerminalUpdate {
                    status: JobStatus::Error,
                    progress: format!("Error: {}", failure.message),
                    result: partial
                        .as_ref()
                        .and_then(|p| serde_json::to_value(&p.result).ok()),
                    research_data: partial
                        .as_ref()
                        .and_then(|p| serde_json::to_value(&p.research_data).ok()),
                    error: Some(failure.message.clone()),
                    logs: run.logs.clone(),
                };
                let message = LiveMessage::Error {
                    job_id: run.job_id,
                    status: JobStatus::Error,
                    error: failure.message,
                    logs: run.logs.clone(),
                    trace_id: run.trace_id.clone(),
                };
                (update, message, None)
            }
        };

        self.persist_terminal(run.job_id, &update).await;
        self.live.push(run.job_id, message).await;
        self.publish_outcome(request, run, &update, normalized.as_ref());

        tracing::info!(
            job_id = %run.job_id,
            status = %update.status,
            log_lines = update.logs.len(),
            "Research job finished",
        );
    }

    /// Write the terminal state, retrying a bounded number of times.
    async fn persist_terminal(&self, job_id: JobId, update: &TerminalUpdate) -> bool {
        let attempts = self.config.persist_attempts.max(1);
        for attempt in 1..=attempts {
            match self.store.finish(job_id, update).await {
                Ok(true) => return true,
                Ok(false) => {
                    tracing::warn!(job_id = %job_id, "Terminal update matched no job");
                    return false;
                }
                Err(e) => {
                    tracing::error!(job_id = %job_id, attempt, error = %e, "Failed to persist terminal state");
                    if attempt < attempts {
                        tokio::time::sleep(self.config.persist_retry_delay).await;
                    }
                }
            }
        }
        false
    }

    fn publish_outcome(
        &self,
        request: &JobRequest,
        run: &JobRun,
        update: &TerminalUpdate,
        normalized: Option<&Normalized>,
    ) {
        let Some(bus) = &self.events else {
            return;
        };

        let event_type = match update.status {
            JobStatus::Completed => EVENT_JOB_COMPLETED,
            _ => EVENT_JOB_FAILED,
        };
        bus.publish(
            PlatformEvent::new(event_type)
                .with_job(run.job_id)
                .with_payload(json!({
                    "status": update.status,
                    "trace_id": run.trace_id,
                    "error": update.error,
                })),
        );

        let (Some(trace_id), Some(normalized)) = (&run.trace_id, normalized) else {
            return;
        };
        let input = normalized.evaluation_input();
        if input.research_output.is_empty() {
            return;
        }
        bus.publish(
            EvaluationRequest {
                job_id: run.job_id,
                trace_id: trace_id.clone(),
                query: request.query.clone(),
                research_output: input.research_output,
                sources: input.sources,
            }
            .into_event(),
        );
    }
}
