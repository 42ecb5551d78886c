//! Delve event bus and evaluation hand-off.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`PlatformEvent`]: the canonical domain event envelope.
//! - [`EvaluationDispatcher`]: background service that forwards
//!   evaluation requests for finished jobs to the scoring pipeline and
//!   logs job outcomes.
//! - [`delivery`]: external delivery channels (webhook).

pub mod bus;
pub mod delivery;
pub mod evaluation;

pub use bus::{EventBus, PlatformEvent};
pub use delivery::webhook::WebhookDelivery;
pub use evaluation::{DispatchTally, EvaluationDispatcher, EvaluationRequest};
