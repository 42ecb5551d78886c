use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use delve_core::research::SummaryFormat;
use delve_core::types::JobId;
use delve_db::models::job::{Job, NewJob};
use delve_db::models::status::JobStatus;
use delve_db::{JobStore, MemoryJobStore};
use delve_events::bus::{EVENT_EVALUATION_REQUESTED, EVENT_JOB_COMPLETED, EVENT_JOB_FAILED};
use delve_events::{EvaluationRequest, EventBus};
use delve_pipeline::correlator::{Correlation, Correlator, CorrelatorError};
use delve_pipeline::crew::CrewOutput;
use delve_pipeline::orchestrator::{
    JobRequest, PROGRESS_COMPLETED, PROGRESS_INITIALIZING, PROGRESS_PROCESSING, PROGRESS_STARTING,
};
use delve_pipeline::registry::Outbound;
use delve_pipeline::{
    BodyError, CrewFactory, CrewInputs, JobOrchestrator, LiveMessage, LiveRegistry,
    PipelineConfig, ResearchCrew,
};
use serde_json::json;
use tokio::sync::mpsc;

type Body = dyn Fn(&CrewInputs, &mut CrewOutput) -> Result<serde_json::Value, BodyError>
    + Send
    + Sync;

/// Crew whose behavior is a closure.
struct FnCrew(Arc<Body>);

impl ResearchCrew for FnCrew {
    fn run(
        &self,
        inputs: &CrewInputs,
        output: &mut CrewOutput,
    ) -> Result<serde_json::Value, BodyError> {
        (self.0)(inputs, output)
    }
}

struct FnFactory(Arc<Body>);

impl CrewFactory for FnFactory {
    fn build(&self, _inputs: &CrewInputs) -> Result<Box<dyn ResearchCrew>, BodyError> {
        Ok(Box::new(FnCrew(Arc::clone(&self.0))))
    }
}

struct BrokenFactory;

impl CrewFactory for BrokenFactory {
    fn build(&self, _inputs: &CrewInputs) -> Result<Box<dyn ResearchCrew>, BodyError> {
        Err(BodyError::internal("missing API key"))
    }
}

struct BrokenCorrelator;

impl Correlator for BrokenCorrelator {
    fn open(
        &self,
        _job_id: JobId,
        _query: &str,
        _summary_format: SummaryFormat,
    ) -> Result<Correlation, CorrelatorError> {
        Err(CorrelatorError("collector unreachable".into()))
    }
}

fn crew<F>(body: F) -> Arc<dyn CrewFactory>
where
    F: Fn(&CrewInputs, &mut CrewOutput) -> Result<serde_json::Value, BodyError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnFactory(Arc::new(body)))
}

fn successful_crew() -> Arc<dyn CrewFactory> {
    crew(|inputs, output| {
        writeln!(output.stdout, "Researching: {}", inputs.query).unwrap();
        writeln!(output.stderr, "Using search tool").unwrap();
        writeln!(output.stdout, "Analysis complete").unwrap();
        Ok(json!({
            "raw": "NIL policy changed recruiting. Source: https://ncaa.example/nil",
            "tasks_output": [
                {"agent": "Senior Researcher", "description": "Gather sources", "raw": "https://ncaa.example/nil"},
                {"agent": "Data Analyst", "description": "Assess impact", "raw": "Significant"}
            ]
        }))
    })
}

fn test_config() -> PipelineConfig {
    PipelineConfig {
        poll_interval: Duration::from_millis(10),
        drain_grace: Duration::from_millis(50),
        persist_retry_delay: Duration::from_millis(10),
        report_path: "does/not/exist/report.md".into(),
        ..PipelineConfig::default()
    }
}

struct Harness {
    store: Arc<MemoryJobStore>,
    live: Arc<LiveRegistry>,
    orchestrator: JobOrchestrator,
}

fn harness(crews: Arc<dyn CrewFactory>, config: PipelineConfig) -> Harness {
    let store = Arc::new(MemoryJobStore::new());
    let live = Arc::new(LiveRegistry::new());
    let orchestrator = JobOrchestrator::new(store.clone(), Arc::clone(&live), crews, config);
    Harness {
        store,
        live,
        orchestrator,
    }
}

impl Harness {
    async fn create(&self) -> Job {
        self.store
            .create(&NewJob {
                query: "impact of NIL policy".into(),
                summary_format: SummaryFormat::Brief,
                selected_agents: None,
            })
            .await
            .unwrap()
    }

    async fn run(&self) -> Job {
        let job = self.create().await;
        self.orchestrator.execute(JobRequest::from_job(&job)).await;
        self.store.find(job.job_id).await.unwrap().unwrap()
    }
}

/// Every live message delivered so far, in order.
fn received(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<LiveMessage> {
    let mut messages = Vec::new();
    while let Ok(Outbound::Message(message)) = rx.try_recv() {
        messages.push(message);
    }
    messages
}

#[tokio::test]
async fn successful_job_completes_with_normalized_result() {
    let h = harness(successful_crew(), test_config());

    let job = h.run().await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.as_deref(), Some(PROGRESS_COMPLETED));
    assert!(job.completed_at.is_some());
    assert!(job.error.is_none());

    let result = job.result.as_ref().unwrap();
    assert!(result["raw_output"].as_str().unwrap().starts_with("NIL policy"));
    assert_eq!(result["tasks_output"].as_array().unwrap().len(), 2);
    assert!(result.get("report").is_none());

    let research = job.research_data.as_ref().unwrap();
    assert_eq!(research["research_findings"][0]["agent"], "Senior Researcher");
    assert_eq!(research["analysis_data"][0]["output"], "Significant");

    assert_eq!(
        job.log_lines(),
        vec![
            "Researching: impact of NIL policy",
            "Using search tool",
            "Analysis complete"
        ]
    );
    let trace_id = job.trace_id.as_deref().unwrap();
    assert_eq!(trace_id.len(), 32);
}

#[tokio::test]
async fn status_history_follows_lifecycle() {
    let h = harness(successful_crew(), test_config());
    let job = h.run().await;

    assert_eq!(
        h.store.status_history(job.job_id).await,
        vec![JobStatus::Pending, JobStatus::Running, JobStatus::Completed]
    );
}

#[tokio::test]
async fn live_observer_sees_progress_logs_then_one_terminal_message() {
    let h = harness(successful_crew(), test_config());
    let job = h.create().await;
    let (_conn, mut rx) = h.live.register(job.job_id).await;

    h.orchestrator.execute(JobRequest::from_job(&job)).await;
    let messages = received(&mut rx);

    let kinds: Vec<&str> = messages.iter().map(LiveMessage::kind).collect();
    assert_eq!(
        kinds,
        vec!["progress", "progress", "log", "log", "log", "progress", "complete"]
    );

    let progress: Vec<&str> = messages
        .iter()
        .filter_map(|m| match m {
            LiveMessage::Progress { progress, .. } => Some(progress.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(
        progress,
        vec![PROGRESS_INITIALIZING, PROGRESS_STARTING, PROGRESS_PROCESSING]
    );

    assert_matches!(
        messages.last(),
        Some(LiveMessage::Complete { status: JobStatus::Completed, logs, trace_id: Some(_), .. })
            if logs.len() == 3
    );
    assert_eq!(messages.iter().filter(|m| m.is_terminal()).count(), 1);
}

#[tokio::test]
async fn body_failure_ends_in_error() {
    let h = harness(
        crew(|_, output| {
            writeln!(output.stdout, "Starting search").unwrap();
            Err(BodyError::timeout("timeout"))
        }),
        test_config(),
    );
    let job = h.create().await;
    let (_conn, mut rx) = h.live.register(job.job_id).await;

    h.orchestrator.execute(JobRequest::from_job(&job)).await;
    let job = h.store.find(job.job_id).await.unwrap().unwrap();

    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.error.as_deref(), Some("timeout"));
    assert_eq!(job.progress.as_deref(), Some("Error: timeout"));
    assert!(job.completed_at.is_some());
    assert_eq!(job.log_lines(), vec!["Starting search"]);

    let messages = received(&mut rx);
    assert_matches!(
        messages.last(),
        Some(LiveMessage::Error { status: JobStatus::Error, error, .. }) if error == "timeout"
    );
    assert!(!messages
        .iter()
        .any(|m| matches!(m, LiveMessage::Progress { progress, .. } if progress == PROGRESS_PROCESSING)));
}

#[tokio::test]
async fn failure_keeps_partial_results() {
    let h = harness(
        crew(|_, _| {
            Err(BodyError::timeout("timeout").with_partial(json!({
                "raw": "half done",
                "tasks_output": [{"agent": "Researcher", "description": "search", "raw": "one source"}]
            })))
        }),
        test_config(),
    );

    let job = h.run().await;

    assert_eq!(job.status, JobStatus::Error);
    let result = job.result.unwrap();
    assert_eq!(result["raw_output"], "half done");
    assert_eq!(result["tasks_output"][0]["output"], "one source");
}

#[tokio::test]
async fn upstream_failure_recovers_with_partial_failure_output() {
    let h = harness(
        crew(|_, _| Err(BodyError::upstream("model overloaded"))),
        test_config(),
    );

    let job = h.run().await;

    assert_eq!(job.status, JobStatus::Completed);
    let raw = job.result.unwrap()["raw_output"].as_str().unwrap().to_string();
    let raw: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(raw["status"], "partial_failure");
    assert_eq!(raw["error"], "model overloaded");
}

#[tokio::test]
async fn initialization_failure_opens_no_queue() {
    let h = harness(Arc::new(BrokenFactory), test_config());
    let job = h.create().await;
    let (_conn, mut rx) = h.live.register(job.job_id).await;

    h.orchestrator.execute(JobRequest::from_job(&job)).await;
    let job = h.store.find(job.job_id).await.unwrap().unwrap();

    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(
        job.error.as_deref(),
        Some("Failed to initialize crew: missing API key")
    );
    assert!(job.log_lines().is_empty());
    assert_eq!(h.orchestrator.queues().open_count().await, 0);

    let kinds: Vec<&str> = received(&mut rx).iter().map(LiveMessage::kind).collect();
    assert_eq!(kinds, vec!["progress", "error"]);
}

#[tokio::test]
async fn panicking_body_is_reported_as_error() {
    let h = harness(
        crew(|_, _| panic!("index out of bounds")),
        test_config(),
    );

    let job = h.run().await;

    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.error.as_deref(), Some("index out of bounds"));
    assert_eq!(h.orchestrator.queues().open_count().await, 0);
}

#[tokio::test]
async fn full_queue_neither_fails_body_nor_loses_transcript() {
    let config = PipelineConfig {
        queue_capacity: 1,
        ..test_config()
    };
    let h = harness(
        crew(|_, output| {
            for i in 0..200 {
                writeln!(output.stdout, "line {i}").unwrap();
            }
            Ok(json!({"raw": "done"}))
        }),
        config,
    );

    let job = h.run().await;

    assert_eq!(job.status, JobStatus::Completed);
    let logs = job.log_lines();
    assert_eq!(logs.len(), 200);
    assert_eq!(logs.first().map(String::as_str), Some("line 0"));
    assert_eq!(logs.last().map(String::as_str), Some("line 199"));
}

#[tokio::test]
async fn terminal_write_is_retried() {
    let store = Arc::new(MemoryJobStore::new());
    let body_store = Arc::clone(&store);
    let live = Arc::new(LiveRegistry::new());
    let orchestrator = JobOrchestrator::new(
        store.clone(),
        Arc::clone(&live),
        // The next two writes are the "processing" progress line and the
        // first terminal attempt.
        crew(move |_, _| {
            body_store.fail_next_writes(2);
            Ok(json!({"raw": "done"}))
        }),
        test_config(),
    );
    let job = store
        .create(&NewJob {
            query: "q".into(),
            summary_format: SummaryFormat::Detailed,
            selected_agents: None,
        })
        .await
        .unwrap();

    orchestrator.execute(JobRequest::from_job(&job)).await;

    let job = store.find(job.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn observer_gets_terminal_message_even_when_store_rejects_it() {
    let store = Arc::new(MemoryJobStore::new());
    let body_store = Arc::clone(&store);
    let live = Arc::new(LiveRegistry::new());
    let orchestrator = JobOrchestrator::new(
        store.clone(),
        Arc::clone(&live),
        crew(move |_, _| {
            body_store.fail_next_writes(100);
            Ok(json!({"raw": "done"}))
        }),
        test_config(),
    );
    let job = store
        .create(&NewJob {
            query: "q".into(),
            summary_format: SummaryFormat::Detailed,
            selected_agents: None,
        })
        .await
        .unwrap();
    let (_conn, mut rx) = live.register(job.job_id).await;

    orchestrator.execute(JobRequest::from_job(&job)).await;

    assert_matches!(received(&mut rx).last(), Some(LiveMessage::Complete { .. }));
    let job = store.find(job.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Running);
}

#[tokio::test]
async fn correlator_failure_does_not_fail_job() {
    let store = Arc::new(MemoryJobStore::new());
    let orchestrator = JobOrchestrator::new(
        store.clone(),
        Arc::new(LiveRegistry::new()),
        successful_crew(),
        test_config(),
    )
    .with_correlator(Arc::new(BrokenCorrelator));
    let job = store
        .create(&NewJob {
            query: "q".into(),
            summary_format: SummaryFormat::Brief,
            selected_agents: None,
        })
        .await
        .unwrap();

    orchestrator.execute(JobRequest::from_job(&job)).await;

    let job = store.find(job.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.trace_id.is_none());
}

#[tokio::test]
async fn report_file_is_attached() {
    let dir = tempfile::tempdir().unwrap();
    let report_path = dir.path().join("report.md");
    std::fs::write(&report_path, "# NIL Policy Report").unwrap();

    let h = harness(
        successful_crew(),
        PipelineConfig {
            report_path,
            ..test_config()
        },
    );

    let job = h.run().await;

    assert_eq!(job.result.unwrap()["report"], "# NIL Policy Report");
}

#[tokio::test]
async fn completed_job_requests_evaluation() {
    let bus = Arc::new(EventBus::default());
    let mut events = bus.subscribe();
    let store = Arc::new(MemoryJobStore::new());
    let orchestrator = JobOrchestrator::new(
        store.clone(),
        Arc::new(LiveRegistry::new()),
        successful_crew(),
        test_config(),
    )
    .with_event_bus(Arc::clone(&bus));
    let job = store
        .create(&NewJob {
            query: "impact of NIL policy".into(),
            summary_format: SummaryFormat::Brief,
            selected_agents: None,
        })
        .await
        .unwrap();

    orchestrator.execute(JobRequest::from_job(&job)).await;

    let completed = events.recv().await.unwrap();
    assert_eq!(completed.event_type, EVENT_JOB_COMPLETED);
    let evaluation = events.recv().await.unwrap();
    assert_eq!(evaluation.event_type, EVENT_EVALUATION_REQUESTED);

    let request = EvaluationRequest::from_event(&evaluation).unwrap();
    let stored = store.find(job.job_id).await.unwrap().unwrap();
    assert_eq!(request.job_id, job.job_id);
    assert_eq!(Some(request.trace_id), stored.trace_id);
    assert_eq!(request.query, "impact of NIL policy");
    assert!(request.research_output.starts_with("## Senior Researcher"));
    assert_eq!(request.sources, vec!["https://ncaa.example/nil"]);
}

#[tokio::test]
async fn failed_job_publishes_failure_without_evaluation() {
    let bus = Arc::new(EventBus::default());
    let mut events = bus.subscribe();
    let store = Arc::new(MemoryJobStore::new());
    let orchestrator = JobOrchestrator::new(
        store.clone(),
        Arc::new(LiveRegistry::new()),
        Arc::new(BrokenFactory),
        test_config(),
    )
    .with_event_bus(Arc::clone(&bus));
    let job = store
        .create(&NewJob {
            query: "q".into(),
            summary_format: SummaryFormat::Brief,
            selected_agents: None,
        })
        .await
        .unwrap();

    orchestrator.execute(JobRequest::from_job(&job)).await;

    assert_eq!(events.recv().await.unwrap().event_type, EVENT_JOB_FAILED);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn submitted_jobs_are_tracked_until_done() {
    let h = harness(successful_crew(), test_config());

    let job = h
        .orchestrator
        .submit(NewJob {
            query: "impact of NIL policy".into(),
            summary_format: SummaryFormat::Brief,
            selected_agents: Some(vec!["researcher".into()]),
        })
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Pending);

    let tracker = h.orchestrator.tracker().clone();
    tracker.close();
    tokio::time::timeout(Duration::from_secs(5), tracker.wait())
        .await
        .unwrap();

    let job = h.store.find(job.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.result.unwrap()["raw_output"].is_string());
}

#[tokio::test]
async fn selected_agents_reach_the_crew() {
    let h = harness(
        crew(|inputs, _| {
            Ok(json!({ "raw": inputs.selected_agents.clone().unwrap_or_default().join(",") }))
        }),
        test_config(),
    );

    let job = h
        .store
        .create(&NewJob {
            query: "q".into(),
            summary_format: SummaryFormat::Comprehensive,
            selected_agents: Some(vec!["researcher".into(), "analyst".into()]),
        })
        .await
        .unwrap();
    h.orchestrator.execute(JobRequest::from_job(&job)).await;

    let job = h.store.find(job.job_id).await.unwrap().unwrap();
    assert_eq!(job.result.unwrap()["raw_output"], "researcher,analyst");
}
