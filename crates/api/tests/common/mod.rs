#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use delve_core::types::JobId;
use delve_db::models::job::Job;
use delve_db::models::status::JobStatus;
use delve_db::{JobStore, MemoryJobStore};
use delve_events::EventBus;
use delve_pipeline::crew::CrewOutput;
use delve_pipeline::{BodyError, CrewFactory, CrewInputs, PipelineConfig, ResearchCrew};
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;

use delve_api::config::ServerConfig;
use delve_api::router::build_app_router;
use delve_api::state::AppState;

/// Build a test `ServerConfig` with safe defaults and fast pipeline timings.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:3000".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        pipeline: PipelineConfig {
            poll_interval: Duration::from_millis(10),
            drain_grace: Duration::from_millis(200),
            persist_retry_delay: Duration::from_millis(5),
            report_path: "does-not-exist/report.md".into(),
            ..PipelineConfig::default()
        },
    }
}

/// Crew that prints a couple of lines and returns a fixed result.
pub struct EchoCrew;

impl ResearchCrew for EchoCrew {
    fn run(
        &self,
        inputs: &CrewInputs,
        output: &mut CrewOutput,
    ) -> Result<serde_json::Value, BodyError> {
        use std::io::Write;
        writeln!(output.stdout, "Researching: {}", inputs.query)
            .map_err(|e| BodyError::internal(e.to_string()))?;
        writeln!(output.stdout, "Writing summary")
            .map_err(|e| BodyError::internal(e.to_string()))?;
        Ok(json!({
            "raw": format!("Findings about {}", inputs.query),
            "tasks_output": [
                {"agent": "Researcher", "description": "search", "raw": "see https://example.com/a"}
            ]
        }))
    }
}

/// Crew that holds the job in `running` until the gate is opened.
pub struct GatedCrew {
    pub gate: Arc<std::sync::Mutex<std::sync::mpsc::Receiver<()>>>,
}

impl ResearchCrew for GatedCrew {
    fn run(
        &self,
        _inputs: &CrewInputs,
        output: &mut CrewOutput,
    ) -> Result<serde_json::Value, BodyError> {
        use std::io::Write;
        writeln!(output.stdout, "waiting for gate").map_err(|e| BodyError::internal(e.to_string()))?;
        if let Ok(gate) = self.gate.lock() {
            let _ = gate.recv_timeout(Duration::from_secs(10));
        }
        Ok(json!("gated result"))
    }
}

pub struct EchoFactory;

impl CrewFactory for EchoFactory {
    fn build(&self, _inputs: &CrewInputs) -> Result<Box<dyn ResearchCrew>, BodyError> {
        Ok(Box::new(EchoCrew))
    }
}

pub struct GatedFactory {
    pub gate: Arc<std::sync::Mutex<std::sync::mpsc::Receiver<()>>>,
}

impl CrewFactory for GatedFactory {
    fn build(&self, _inputs: &CrewInputs) -> Result<Box<dyn ResearchCrew>, BodyError> {
        Ok(Box::new(GatedCrew {
            gate: Arc::clone(&self.gate),
        }))
    }
}

/// Application state over an in-memory store with the given crew factory.
pub fn test_state(crews: Arc<dyn CrewFactory>) -> (AppState, Arc<MemoryJobStore>) {
    let memory = Arc::new(MemoryJobStore::new());
    let store: Arc<dyn JobStore> = memory.clone();
    let state = AppState::new(store, test_config(), crews, Arc::new(EventBus::default()));
    (state, memory)
}

/// Build the full application router exactly as `main.rs` does.
pub fn build_test_app(state: AppState) -> Router {
    let config = test_config();
    build_app_router(state, &config)
}

/// Router backed by an in-memory store and [`EchoFactory`].
pub fn echo_app() -> (Router, AppState, Arc<MemoryJobStore>) {
    let (state, memory) = test_state(Arc::new(EchoFactory));
    (build_test_app(state.clone()), state, memory)
}

/// Collect a response body as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("failed to read response body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("response body is not valid JSON")
}

/// Send a GET request.
pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Send a POST request with a JSON body.
pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Poll the store until the job reaches a terminal status.
pub async fn wait_terminal(store: &MemoryJobStore, job_id: JobId) -> Job {
    for _ in 0..200 {
        if let Some(job) = store.find(job_id).await.unwrap() {
            if job.status.is_terminal() {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {job_id} did not finish");
}

/// Poll the store until the job reports `running`.
pub async fn wait_running(store: &MemoryJobStore, job_id: JobId) {
    for _ in 0..200 {
        if let Some(job) = store.find(job_id).await.unwrap() {
            if job.status == JobStatus::Running {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} never started");
}
