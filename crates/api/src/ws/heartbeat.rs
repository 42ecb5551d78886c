use std::sync::Arc;
use std::time::Duration;

use delve_pipeline::LiveRegistry;

/// Interval between heartbeat pings (in seconds).
const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Spawn a background task that pings every live observer periodically.
///
/// Runs until aborted; `main` aborts it during shutdown.
pub fn start_heartbeat(live: Arc<LiveRegistry>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));

        loop {
            interval.tick().await;
            let count = live.connection_count().await;
            tracing::debug!(count, "Live channel heartbeat ping");
            live.ping_all().await;
        }
    })
}
