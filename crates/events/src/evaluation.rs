//! Hand-off of finished research output to the evaluation pipeline.
//!
//! The job pipeline publishes an [`EvaluationRequest`] on the
//! [`EventBus`](crate::bus::EventBus) once a job's terminal state is
//! persisted. [`EvaluationDispatcher`] subscribes to the bus and forwards
//! each request to the configured scoring endpoint without ever blocking
//! the publisher. It also logs every job outcome event it sees and reports
//! the tally when the bus closes.

use delve_core::types::JobId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::bus::{
    PlatformEvent, EVENT_EVALUATION_REQUESTED, EVENT_JOB_COMPLETED, EVENT_JOB_FAILED,
};
use crate::delivery::webhook::WebhookDelivery;

/// Input for one evaluation run, correlated to the job's trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub job_id: JobId,
    pub trace_id: String,
    pub query: String,
    pub research_output: String,
    pub sources: Vec<String>,
}

impl EvaluationRequest {
    /// Wrap the request in a bus event.
    pub fn into_event(self) -> PlatformEvent {
        let job_id = self.job_id;
        let payload = serde_json::to_value(&self).unwrap_or_default();
        PlatformEvent::new(EVENT_EVALUATION_REQUESTED)
            .with_job(job_id)
            .with_payload(payload)
    }

    /// Recover a request from a bus event, if the event carries one.
    pub fn from_event(event: &PlatformEvent) -> Option<Self> {
        if event.event_type != EVENT_EVALUATION_REQUESTED {
            return None;
        }
        serde_json::from_value(event.payload.clone()).ok()
    }
}

/// Events seen by one dispatcher run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchTally {
    pub completed: u64,
    pub failed: u64,
    pub evaluations: u64,
}

/// Background service forwarding evaluation requests.
pub struct EvaluationDispatcher {
    target: Option<(WebhookDelivery, String)>,
}

impl EvaluationDispatcher {
    /// Forward requests to `url` through `delivery`.
    pub fn webhook(delivery: WebhookDelivery, url: impl Into<String>) -> Self {
        Self {
            target: Some((delivery, url.into())),
        }
    }

    /// Log requests without forwarding them anywhere.
    pub fn disabled() -> Self {
        Self { target: None }
    }

    /// Run the dispatch loop.
    ///
    /// Exits when the channel is closed (the bus is dropped). Each delivery
    /// runs on its own task so a slow endpoint never stalls the loop.
    pub async fn run(self, mut receiver: broadcast::Receiver<PlatformEvent>) -> DispatchTally {
        let mut tally = DispatchTally::default();
        loop {
            match receiver.recv().await {
                Ok(event) => match event.event_type.as_str() {
                    EVENT_JOB_COMPLETED => {
                        tally.completed += 1;
                        log_outcome(&event);
                    }
                    EVENT_JOB_FAILED => {
                        tally.failed += 1;
                        log_outcome(&event);
                    }
                    _ => {
                        if let Some(request) = EvaluationRequest::from_event(&event) {
                            tally.evaluations += 1;
                            self.dispatch(request);
                        }
                    }
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(
                        skipped = n,
                        "Evaluation dispatcher lagged, some requests were dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!(
                        completed = tally.completed,
                        failed = tally.failed,
                        evaluations = tally.evaluations,
                        "Event bus closed, evaluation dispatcher shutting down"
                    );
                    break;
                }
            }
        }
        tally
    }

    fn dispatch(&self, request: EvaluationRequest) {
        let Some((delivery, url)) = &self.target else {
            tracing::debug!(
                job_id = %request.job_id,
                trace_id = %request.trace_id,
                sources = request.sources.len(),
                "No evaluation endpoint configured, skipping evaluation"
            );
            return;
        };

        let delivery = delivery.clone();
        let url = url.clone();
        tokio::spawn(async move {
            let payload = serde_json::to_value(&request).unwrap_or_default();
            match delivery.deliver(&url, &payload).await {
                Ok(()) => tracing::info!(
                    job_id = %request.job_id,
                    trace_id = %request.trace_id,
                    "Evaluation request delivered"
                ),
                Err(e) => tracing::error!(
                    job_id = %request.job_id,
                    error = %e,
                    "Evaluation request could not be delivered"
                ),
            }
        });
    }
}

fn log_outcome(event: &PlatformEvent) {
    let field = |key: &str| event.payload.get(key).and_then(|v| v.as_str()).unwrap_or("");
    let job_id = event.job_id.map(|id| id.to_string()).unwrap_or_default();
    if event.event_type == EVENT_JOB_FAILED {
        tracing::warn!(
            job_id = %job_id,
            trace_id = field("trace_id"),
            error = field("error"),
            "Research job failed"
        );
    } else {
        tracing::info!(
            job_id = %job_id,
            trace_id = field("trace_id"),
            "Research job completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use serde_json::json;

    fn sample() -> EvaluationRequest {
        EvaluationRequest {
            job_id: JobId::new_v4(),
            trace_id: "0af7651916cd43dd8448eb211c80319c".into(),
            query: "impact of NIL policy".into(),
            research_output: "## Researcher: find\n\nbody".into(),
            sources: vec!["https://example.org/a".into()],
        }
    }

    #[test]
    fn request_survives_event_envelope() {
        let request = sample();
        let event = request.clone().into_event();
        assert_eq!(event.event_type, EVENT_EVALUATION_REQUESTED);
        assert_eq!(event.job_id, Some(request.job_id));
        assert_eq!(EvaluationRequest::from_event(&event), Some(request));
    }

    #[test]
    fn other_events_are_not_requests() {
        let event = PlatformEvent::new(EVENT_JOB_COMPLETED);
        assert!(EvaluationRequest::from_event(&event).is_none());
    }

    #[tokio::test]
    async fn dispatcher_stops_when_bus_is_dropped() {
        let bus = EventBus::default();
        let handle = tokio::spawn(EvaluationDispatcher::disabled().run(bus.subscribe()));

        bus.publish(sample().into_event());
        drop(bus);

        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("dispatcher should exit")
            .expect("dispatcher task should not panic");
    }

    #[tokio::test]
    async fn dispatcher_tallies_job_outcomes() {
        let bus = EventBus::default();
        let handle = tokio::spawn(EvaluationDispatcher::disabled().run(bus.subscribe()));
        let job_id = JobId::new_v4();

        bus.publish(
            PlatformEvent::new(EVENT_JOB_COMPLETED)
                .with_job(job_id)
                .with_payload(json!({"status": "completed", "trace_id": "abc", "error": null})),
        );
        bus.publish(
            PlatformEvent::new(EVENT_JOB_FAILED)
                .with_job(JobId::new_v4())
                .with_payload(json!({"status": "failed", "trace_id": "def", "error": "timeout"})),
        );
        bus.publish(sample().into_event());
        bus.publish(PlatformEvent::new("research_job.unrelated"));
        drop(bus);

        let tally = tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("dispatcher should exit")
            .expect("dispatcher task should not panic");

        assert_eq!(
            tally,
            DispatchTally {
                completed: 1,
                failed: 1,
                evaluations: 1,
            }
        );
    }
}
