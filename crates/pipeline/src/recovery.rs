use std::collections::HashMap;

use serde_json::json;

use crate::crew::{BodyError, ErrorClass};

/// What to do when the compute body fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// Replace the result with a partial-failure output and let the job
    /// complete.
    ReturnPartialResults,
    /// Fail the job with the body's error.
    Propagate,
}

/// Maps error classes to recovery strategies.
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    rules: HashMap<ErrorClass, RecoveryStrategy>,
}

impl Default for RecoveryPolicy {
    /// Upstream failures keep whatever the crew produced; everything else
    /// fails the job.
    fn default() -> Self {
        Self::propagate_all().with(ErrorClass::Upstream, RecoveryStrategy::ReturnPartialResults)
    }
}

impl RecoveryPolicy {
    pub fn propagate_all() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    pub fn with(mut self, class: ErrorClass, strategy: RecoveryStrategy) -> Self {
        self.rules.insert(class, strategy);
        self
    }

    pub fn strategy_for(&self, class: ErrorClass) -> RecoveryStrategy {
        self.rules
            .get(&class)
            .copied()
            .unwrap_or(RecoveryStrategy::Propagate)
    }

    /// Apply the strategy for `err.class`.
    pub fn recover(&self, err: BodyError) -> Result<serde_json::Value, BodyError> {
        match self.strategy_for(err.class) {
            RecoveryStrategy::Propagate => Err(err),
            RecoveryStrategy::ReturnPartialResults => {
                tracing::warn!(class = %err.class, error = %err, "Returning partial results");
                Ok(partial_failure_output(&err))
            }
        }
    }
}

/// Result shape used in place of a crew result after a recovered failure.
fn partial_failure_output(err: &BodyError) -> serde_json::Value {
    let tasks = err
        .partial
        .as_ref()
        .and_then(|p| p.get("tasks_output"))
        .filter(|t| t.is_array())
        .cloned()
        .unwrap_or_else(|| json!([]));
    let summary = json!({
        "error": err.message,
        "partial_results": tasks,
        "status": "partial_failure",
    });
    json!({
        "raw": summary.to_string(),
        "tasks_output": tasks,
    })
}
