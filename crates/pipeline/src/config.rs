use std::path::PathBuf;
use std::time::Duration;

/// Default capacity of the per-job log queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Default report artifact location, relative to the working directory.
pub const DEFAULT_REPORT_PATH: &str = "output/report.md";

/// Tuning for job execution, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Bounded capacity of each job's log queue (default: `1000`).
    pub queue_capacity: usize,
    /// How long the forwarder waits on an empty queue before re-checking
    /// for cancellation (default: `100ms`).
    pub poll_interval: Duration,
    /// How long to let the forwarder drain on its own after the body
    /// returns, before cancelling it (default: `500ms`).
    pub drain_grace: Duration,
    /// Report file attached to completed results when present.
    pub report_path: PathBuf,
    /// Attempts made for the terminal store write (default: `3`).
    pub persist_attempts: u32,
    /// Pause between terminal write attempts (default: `200ms`).
    pub persist_retry_delay: Duration,
    /// Command line of the external research program, if configured.
    pub research_command: Option<String>,
    /// Timeout applied to one run of the research program (default: `1800s`).
    pub research_timeout: Duration,
    /// Webhook that receives evaluation requests, if configured.
    pub evaluation_webhook_url: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_interval: Duration::from_millis(100),
            drain_grace: Duration::from_millis(500),
            report_path: PathBuf::from(DEFAULT_REPORT_PATH),
            persist_attempts: 3,
            persist_retry_delay: Duration::from_millis(200),
            research_command: None,
            research_timeout: Duration::from_secs(1800),
            evaluation_webhook_url: None,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default            |
    /// |--------------------------|--------------------|
    /// | `LOG_QUEUE_CAPACITY`     | `1000`             |
    /// | `FORWARDER_POLL_MS`      | `100`              |
    /// | `DRAIN_GRACE_MS`         | `500`              |
    /// | `REPORT_PATH`            | `output/report.md` |
    /// | `RESEARCH_COMMAND`       | unset              |
    /// | `RESEARCH_TIMEOUT_SECS`  | `1800`             |
    /// | `EVALUATION_WEBHOOK_URL` | unset              |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let queue_capacity: usize = std::env::var("LOG_QUEUE_CAPACITY")
            .map(|v| v.parse().expect("LOG_QUEUE_CAPACITY must be a valid usize"))
            .unwrap_or(defaults.queue_capacity);

        let poll_ms: u64 = std::env::var("FORWARDER_POLL_MS")
            .map(|v| v.parse().expect("FORWARDER_POLL_MS must be a valid u64"))
            .unwrap_or(100);

        let grace_ms: u64 = std::env::var("DRAIN_GRACE_MS")
            .map(|v| v.parse().expect("DRAIN_GRACE_MS must be a valid u64"))
            .unwrap_or(500);

        let report_path = std::env::var("REPORT_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.report_path);

        let research_timeout_secs: u64 = std::env::var("RESEARCH_TIMEOUT_SECS")
            .map(|v| v.parse().expect("RESEARCH_TIMEOUT_SECS must be a valid u64"))
            .unwrap_or(1800);

        Self {
            queue_capacity: queue_capacity.max(1),
            poll_interval: Duration::from_millis(poll_ms.max(1)),
            drain_grace: Duration::from_millis(grace_ms),
            report_path,
            persist_attempts: defaults.persist_attempts,
            persist_retry_delay: defaults.persist_retry_delay,
            research_command: non_empty_var("RESEARCH_COMMAND"),
            research_timeout: Duration::from_secs(research_timeout_secs),
            evaluation_webhook_url: non_empty_var("EVALUATION_WEBHOOK_URL"),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.queue_capacity, 1000);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.drain_grace, Duration::from_millis(500));
        assert_eq!(config.report_path, PathBuf::from("output/report.md"));
        assert_eq!(config.persist_attempts, 3);
        assert!(config.research_command.is_none());
    }
}
