//! Per-job live channel over WebSocket.
//!
//! Provides the HTTP upgrade handler and the heartbeat task. Connection
//! bookkeeping lives in [`delve_pipeline::LiveRegistry`] so the job
//! orchestrator can push to observers directly.

mod handler;
mod heartbeat;

pub use handler::live_handler;
pub use heartbeat::start_heartbeat;
