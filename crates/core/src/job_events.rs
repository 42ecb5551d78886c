//! Live channel message type constants for research job events.
//!
//! Every JSON frame pushed to a job's live channel carries one of these
//! values in its `type` field.

/// Snapshot sent once when an observer attaches to a non-terminal job.
pub const MSG_TYPE_STATUS: &str = "status";

/// Stage transition while the job is running.
pub const MSG_TYPE_PROGRESS: &str = "progress";

/// One captured line of compute body output.
pub const MSG_TYPE_LOG: &str = "log";

/// Job finished successfully. Terminal.
pub const MSG_TYPE_COMPLETE: &str = "complete";

/// Job failed. Terminal.
pub const MSG_TYPE_ERROR: &str = "error";

/// Echo reply to a client keep-alive text frame.
pub const MSG_TYPE_PONG: &str = "pong";
