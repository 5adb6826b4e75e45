//! Retry and failover configuration for workflow steps.
//!
//! ```ignore
//! workflow()
//!     .failover_to("failover-handler", max_retries(0))
//!     .default_step_recover_strategy(max_retries(1).failover_to("failover-handler"))
//!     .add_step_with_recovery(deposit, max_retries(2).failover_to("compensate-withdraw"))
//! ```

use serde::Serialize;

use super::effect::encode_value;

/// Retry bound before a recovery strategy gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxRetries(pub u32);

impl MaxRetries {
    /// Fail over to `step` once the retries are exhausted.
    pub fn failover_to(self, step: impl Into<String>) -> RecoverStrategy {
        RecoverStrategy {
            max_retries: self.0,
            failover_step: Some(step.into()),
            failover_input: None,
        }
    }

    /// Fail over to `step` with `input` once the retries are exhausted.
    pub fn failover_to_with_input<I: Serialize>(
        self,
        step: impl Into<String>,
        input: &I,
    ) -> RecoverStrategy {
        RecoverStrategy {
            max_retries: self.0,
            failover_step: Some(step.into()),
            failover_input: Some(encode_value(input)),
        }
    }
}

/// Shorthand for `MaxRetries(n)`.
pub fn max_retries(n: u32) -> MaxRetries {
    MaxRetries(n)
}

/// How a failing step is recovered.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoverStrategy {
    /// Re-invocations allowed after the first failure.
    pub max_retries: u32,
    /// Step to transition to once retries are exhausted.
    pub failover_step: Option<String>,
    /// Input handed to the failover step.
    pub failover_input: Option<serde_json::Value>,
}

impl RecoverStrategy {
    /// Zero retries, immediate failover to `step`.
    pub fn failover_to(step: impl Into<String>) -> Self {
        MaxRetries(0).failover_to(step)
    }

    /// Zero retries and no step-level target: the workflow-level failover decides.
    pub fn escalate() -> Self {
        Self {
            max_retries: 0,
            failover_step: None,
            failover_input: None,
        }
    }
}

/// Workflow-level failover, used when a step has no failover target of its
/// own and when the whole workflow times out.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowFailover {
    /// Step receiving control.
    pub step: String,
    /// Input handed to that step.
    pub input: Option<serde_json::Value>,
    /// Retries of the failover step itself before the run fails.
    pub max_retries: u32,
}

/// Resolve the strategy that applies to a step.
///
/// Step-specific strategy first, then the definition default, then
/// [`RecoverStrategy::escalate`].
pub fn resolve(
    step_strategy: Option<&RecoverStrategy>,
    default_strategy: Option<&RecoverStrategy>,
) -> RecoverStrategy {
    step_strategy
        .or(default_strategy)
        .cloned()
        .unwrap_or_else(RecoverStrategy::escalate)
}
