use std::sync::Arc;

use delve_db::JobStore;
use delve_events::EventBus;
use delve_pipeline::{JobOrchestrator, LiveRegistry};

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything inside is behind `Arc` or already `Clone`.
#[derive(Clone)]
pub struct AppState {
    /// Durable job storage.
    pub store: Arc<dyn JobStore>,
    pub config: Arc<ServerConfig>,
    /// Live observers, one per job.
    pub live: Arc<LiveRegistry>,
    /// Starts and tracks research job executions.
    pub orchestrator: JobOrchestrator,
    /// In-process event bus for job outcomes and evaluation requests.
    pub event_bus: Arc<EventBus>,
}

impl AppState {
    /// Wire an orchestrator around `store` and the shared registries.
    pub fn new(
        store: Arc<dyn JobStore>,
        config: ServerConfig,
        crews: Arc<dyn delve_pipeline::CrewFactory>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let live = Arc::new(LiveRegistry::new());
        let orchestrator = JobOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&live),
            crews,
            config.pipeline.clone(),
        )
        .with_event_bus(Arc::clone(&event_bus));

        Self {
            store,
            config: Arc::new(config),
            live,
            orchestrator,
            event_bus,
        }
    }
}
