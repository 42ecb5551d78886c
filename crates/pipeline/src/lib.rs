//! Research job execution and live streaming.
//!
//! [`orchestrator::JobOrchestrator`] drives one job end to end: it opens a
//! correlation span, runs the blocking compute body through the
//! [`bridge::ExecutionBridge`], captures the body's output with a
//! [`sink::CaptureWriter`], forwards captured lines to the job's live
//! observer through the [`registry::LiveRegistry`], normalizes the result
//! and writes exactly one terminal state to the [`delve_db::JobStore`].

pub mod bridge;
pub mod command;
pub mod config;
pub mod correlator;
pub mod crew;
pub mod forwarder;
pub mod messages;
pub mod normalizer;
pub mod orchestrator;
pub mod queue;
pub mod recovery;
pub mod registry;
pub mod sink;

pub use config::PipelineConfig;
pub use crew::{BodyError, CrewFactory, CrewInputs, ErrorClass, ResearchCrew};
pub use messages::LiveMessage;
pub use orchestrator::{JobOrchestrator, JobRequest};
pub use registry::LiveRegistry;
