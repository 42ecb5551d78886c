use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use delve_db::{JobStore, PgJobStore};
use delve_events::{EvaluationDispatcher, EventBus, WebhookDelivery};
use delve_pipeline::command::{CommandCrewFactory, UnconfiguredCrewFactory};
use delve_pipeline::CrewFactory;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use delve_api::config::ServerConfig;
use delve_api::router::build_app_router;
use delve_api::state::AppState;
use delve_api::ws;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "delve_api=debug,delve_pipeline=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = delve_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    delve_db::health_check(&pool)
        .await
        .expect("Database health check failed");

    delve_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool));

    // --- Research crew ---
    let crews: Arc<dyn CrewFactory> = match &config.pipeline.research_command {
        Some(command) => {
            tracing::info!(command = %command, "Research command configured");
            Arc::new(CommandCrewFactory::from_command_line(
                command,
                config.pipeline.research_timeout,
            ))
        }
        None => {
            tracing::warn!("RESEARCH_COMMAND is not set; submitted jobs will fail to initialize");
            Arc::new(UnconfiguredCrewFactory)
        }
    };

    // --- Event bus and evaluation hand-off ---
    let event_bus = Arc::new(EventBus::default());
    let dispatcher = match &config.pipeline.evaluation_webhook_url {
        Some(url) => {
            let delivery = WebhookDelivery::new().expect("Failed to build webhook HTTP client");
            EvaluationDispatcher::webhook(delivery, url.clone())
        }
        None => EvaluationDispatcher::disabled(),
    };
    let dispatcher_handle = tokio::spawn(dispatcher.run(event_bus.subscribe()));

    // --- App state ---
    let state = AppState::new(store, config.clone(), crews, Arc::clone(&event_bus));

    // --- Heartbeat ---
    let heartbeat_handle = ws::start_heartbeat(Arc::clone(&state.live));

    let app = build_app_router(state.clone(), &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    let tracker = state.orchestrator.tracker().clone();
    tracker.close();
    let in_flight = tracker.len();
    tracing::info!(in_flight, "Waiting for running research jobs");
    if tokio::time::timeout(Duration::from_secs(config.shutdown_timeout_secs), tracker.wait())
        .await
        .is_err()
    {
        tracing::warn!(
            remaining = tracker.len(),
            "Shutdown timeout reached with research jobs still running"
        );
    }

    let live_count = state.live.connection_count().await;
    tracing::info!(live_count, "Closing remaining live channels");
    state.live.shutdown_all().await;

    heartbeat_handle.abort();

    // Every bus sender must be gone for the dispatcher to see the close.
    drop(state);
    drop(event_bus);
    match tokio::time::timeout(Duration::from_secs(5), dispatcher_handle).await {
        Ok(Ok(tally)) => tracing::info!(
            completed = tally.completed,
            failed = tally.failed,
            evaluations = tally.evaluations,
            "Evaluation dispatcher stopped"
        ),
        Ok(Err(e)) => tracing::error!(error = %e, "Evaluation dispatcher task failed"),
        Err(_) => tracing::warn!("Evaluation dispatcher did not stop in time"),
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT or SIGTERM to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
