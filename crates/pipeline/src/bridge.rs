use std::any::Any;

use tokio::task::JoinError;

use crate::crew::BodyError;
use crate::recovery::RecoveryPolicy;

/// Runs blocking compute bodies off the async runtime.
#[derive(Debug, Clone, Default)]
pub struct ExecutionBridge {
    policy: RecoveryPolicy,
}

impl ExecutionBridge {
    pub fn new(policy: RecoveryPolicy) -> Self {
        Self { policy }
    }

    /// Run `body` on the blocking pool and wait for it.
    ///
    /// A panic becomes a [`BodyError`] of class `Panic`. Failures go
    /// through the recovery policy exactly once; nothing is retried.
    pub async fn run_off_thread<F>(&self, body: F) -> Result<serde_json::Value, BodyError>
    where
        F: FnOnce() -> Result<serde_json::Value, BodyError> + Send + 'static,
    {
        let outcome = tokio::task::spawn_blocking(body)
            .await
            .unwrap_or_else(|e| Err(join_failure(e)));

        match outcome {
            Ok(value) => Ok(value),
            Err(err) => self.policy.recover(err),
        }
    }
}

fn join_failure(err: JoinError) -> BodyError {
    if err.is_panic() {
        BodyError::panicked(panic_message(err.into_panic()))
    } else {
        BodyError::internal("compute body was cancelled")
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "compute body panicked".to_string()
    }
}
