//! Workflow definitions.
//!
//! Built once per workflow type with [`workflow()`]; step names and failover
//! targets are checked by `build`, so a definition that exists is valid.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use super::effect::encode_value;
use super::recovery::{self, MaxRetries, RecoverStrategy, WorkflowFailover};
use super::step::Step;

/// Errors raised while building a workflow definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("Name '{0}' is already in use by another step in this workflow")]
    DuplicateStep(String),

    #[error("{referenced_by} fails over to unknown step '{step}'")]
    UnknownFailoverStep { referenced_by: String, step: String },

    #[error("Invalid timeout for {0}: must be greater than zero")]
    InvalidTimeout(String),
}

/// Immutable set of steps plus the timeout and recovery policy of one
/// workflow type.
pub struct WorkflowDefinition<S> {
    steps: Vec<Step<S>>,
    index: HashMap<String, usize>,
    workflow_timeout: Option<Duration>,
    default_step_timeout: Option<Duration>,
    default_recover_strategy: Option<RecoverStrategy>,
    failover: Option<WorkflowFailover>,
}

impl<S> std::fmt::Debug for WorkflowDefinition<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("steps", &self.step_names().collect::<Vec<_>>())
            .field("workflow_timeout", &self.workflow_timeout)
            .field("default_step_timeout", &self.default_step_timeout)
            .field("default_recover_strategy", &self.default_recover_strategy)
            .field("failover", &self.failover)
            .finish()
    }
}

impl<S> WorkflowDefinition<S> {
    /// Start an empty definition.
    pub fn builder() -> WorkflowDefinitionBuilder<S> {
        WorkflowDefinitionBuilder::new()
    }

    /// Look up a step by name.
    pub fn find_step(&self, name: &str) -> Option<&Step<S>> {
        self.index.get(name).map(|&i| &self.steps[i])
    }

    /// Steps in definition order.
    pub fn steps(&self) -> &[Step<S>] {
        &self.steps
    }

    /// Step names in definition order.
    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.name())
    }

    /// Bound of the whole run, if any.
    pub fn workflow_timeout(&self) -> Option<Duration> {
        self.workflow_timeout
    }

    /// Step timeout applied when a step has none of its own.
    pub fn default_step_timeout(&self) -> Option<Duration> {
        self.default_step_timeout
    }

    /// Workflow-level failover, if any.
    pub fn failover(&self) -> Option<&WorkflowFailover> {
        self.failover.as_ref()
    }

    /// Effective timeout of `step`: its own, else the definition default,
    /// else `fallback`.
    pub fn step_timeout(&self, step: &str, fallback: Duration) -> Duration {
        self.find_step(step)
            .and_then(|s| s.get_timeout())
            .or(self.default_step_timeout)
            .unwrap_or(fallback)
    }

    /// Recover strategy that applies to `step`.
    pub fn resolve_recovery(&self, step: &str) -> RecoverStrategy {
        recovery::resolve(
            self.find_step(step).and_then(|s| s.get_recover_strategy()),
            self.default_recover_strategy.as_ref(),
        )
    }
}

/// Shorthand for [`WorkflowDefinition::builder`].
pub fn workflow<S>() -> WorkflowDefinitionBuilder<S> {
    WorkflowDefinitionBuilder::new()
}

/// Builder for [`WorkflowDefinition`].
///
/// Errors are recorded as steps are added and surfaced by [`build`](Self::build),
/// so definitions read as one chain.
pub struct WorkflowDefinitionBuilder<S> {
    steps: Vec<Step<S>>,
    index: HashMap<String, usize>,
    workflow_timeout: Option<Duration>,
    default_step_timeout: Option<Duration>,
    default_recover_strategy: Option<RecoverStrategy>,
    failover: Option<WorkflowFailover>,
    error: Option<BuildError>,
}

impl<S> Default for WorkflowDefinitionBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> WorkflowDefinitionBuilder<S> {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            index: HashMap::new(),
            workflow_timeout: None,
            default_step_timeout: None,
            default_recover_strategy: None,
            failover: None,
            error: None,
        }
    }

    /// Bound the whole run.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.workflow_timeout = Some(duration);
        self
    }

    /// Timeout for steps without their own.
    pub fn default_step_timeout(mut self, duration: Duration) -> Self {
        self.default_step_timeout = Some(duration);
        self
    }

    /// Workflow-level failover step.
    pub fn failover_to(mut self, step: impl Into<String>, retries: MaxRetries) -> Self {
        self.failover = Some(WorkflowFailover {
            step: step.into(),
            input: None,
            max_retries: retries.0,
        });
        self
    }

    /// Workflow-level failover step with an input.
    pub fn failover_to_with_input<I: Serialize>(
        mut self,
        step: impl Into<String>,
        input: &I,
        retries: MaxRetries,
    ) -> Self {
        self.failover = Some(WorkflowFailover {
            step: step.into(),
            input: Some(encode_value(input)),
            max_retries: retries.0,
        });
        self
    }

    /// Recover strategy for steps without their own.
    pub fn default_step_recover_strategy(mut self, strategy: RecoverStrategy) -> Self {
        self.default_recover_strategy = Some(strategy);
        self
    }

    /// Append a step.
    pub fn add_step(mut self, step: Step<S>) -> Self {
        if self.error.is_some() {
            return self;
        }
        if self.index.contains_key(step.name()) {
            self.error = Some(BuildError::DuplicateStep(step.name().to_string()));
            return self;
        }
        self.index.insert(step.name().to_string(), self.steps.len());
        self.steps.push(step);
        self
    }

    /// Append a step with a recover strategy, replacing the step's own.
    pub fn add_step_with_recovery(self, step: Step<S>, strategy: RecoverStrategy) -> Self {
        self.add_step(step.recover_strategy(strategy))
    }

    /// Validate and freeze the definition.
    pub fn build(self) -> Result<WorkflowDefinition<S>, BuildError> {
        if let Some(err) = self.error {
            return Err(err);
        }

        check_timeout("workflow", self.workflow_timeout)?;
        check_timeout("default step", self.default_step_timeout)?;
        for step in &self.steps {
            check_timeout(&format!("step '{}'", step.name()), step.get_timeout())?;
        }

        let known = |name: &str| self.index.contains_key(name);

        if let Some(failover) = &self.failover {
            if !known(&failover.step) {
                return Err(BuildError::UnknownFailoverStep {
                    referenced_by: "Workflow".to_string(),
                    step: failover.step.clone(),
                });
            }
        }
        if let Some(target) = self
            .default_recover_strategy
            .as_ref()
            .and_then(|s| s.failover_step.as_deref())
        {
            if !known(target) {
                return Err(BuildError::UnknownFailoverStep {
                    referenced_by: "Default step recover strategy".to_string(),
                    step: target.to_string(),
                });
            }
        }
        for step in &self.steps {
            if let Some(target) = step
                .get_recover_strategy()
                .and_then(|s| s.failover_step.as_deref())
            {
                if !known(target) {
                    return Err(BuildError::UnknownFailoverStep {
                        referenced_by: format!("Step '{}'", step.name()),
                        step: target.to_string(),
                    });
                }
            }
        }

        Ok(WorkflowDefinition {
            steps: self.steps,
            index: self.index,
            workflow_timeout: self.workflow_timeout,
            default_step_timeout: self.default_step_timeout,
            default_recover_strategy: self.default_recover_strategy,
            failover: self.failover,
        })
    }
}

fn check_timeout(what: &str, timeout: Option<Duration>) -> Result<(), BuildError> {
    match timeout {
        Some(d) if d.is_zero() => Err(BuildError::InvalidTimeout(what.to_string())),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::call::DeferredCall;
    use crate::workflow::effect::Effects;
    use crate::workflow::recovery::max_retries;
    use crate::workflow::step::step;

    fn noop(name: &str) -> Step<()> {
        step(name)
            .call(|_ctx, _: ()| DeferredCall::new("noop", "noop", &()))
            .and_then(|_ctx, _: serde_json::Value| Ok(Effects::end()))
    }

    #[test]
    fn test_duplicate_step_fails() {
        let result = workflow()
            .add_step(noop("withdraw"))
            .add_step(noop("deposit"))
            .add_step(noop("withdraw"))
            .build();
        assert_eq!(
            result.unwrap_err(),
            BuildError::DuplicateStep("withdraw".to_string())
        );
    }

    #[test]
    fn test_duplicate_step_fails_regardless_of_content() {
        let other: Step<()> = step("withdraw")
            .async_call(|_ctx, _: ()| async { Ok(1) })
            .and_then(|_ctx, _: i32| Ok(Effects::pause()))
            .timeout(Duration::from_secs(1));
        let result = workflow().add_step(noop("withdraw")).add_step(other).build();
        assert!(matches!(result, Err(BuildError::DuplicateStep(_))));
    }

    #[test]
    fn test_unknown_failover_target() {
        let result = workflow()
            .failover_to("failover-handler", max_retries(0))
            .add_step(noop("withdraw"))
            .build();
        assert_eq!(
            result.unwrap_err(),
            BuildError::UnknownFailoverStep {
                referenced_by: "Workflow".to_string(),
                step: "failover-handler".to_string(),
            }
        );

        let result = workflow()
            .add_step_with_recovery(noop("deposit"), max_retries(2).failover_to("compensate"))
            .build();
        assert!(matches!(
            result,
            Err(BuildError::UnknownFailoverStep { ref step, .. }) if step == "compensate"
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = workflow()
            .timeout(Duration::ZERO)
            .add_step(noop("withdraw"))
            .build();
        assert_eq!(
            result.unwrap_err(),
            BuildError::InvalidTimeout("workflow".to_string())
        );
    }

    #[test]
    fn test_step_timeout_resolution() {
        let definition = workflow()
            .default_step_timeout(Duration::from_secs(2))
            .add_step(noop("withdraw"))
            .add_step(noop("deposit").timeout(Duration::from_secs(7)))
            .build()
            .unwrap();

        let fallback = Duration::from_secs(5);
        assert_eq!(definition.step_timeout("withdraw", fallback), Duration::from_secs(2));
        assert_eq!(definition.step_timeout("deposit", fallback), Duration::from_secs(7));

        let definition = workflow().add_step(noop("withdraw")).build().unwrap();
        assert_eq!(definition.step_timeout("withdraw", fallback), fallback);
    }

    #[test]
    fn test_recovery_resolution() {
        let definition = workflow()
            .failover_to("failover-handler", max_retries(0))
            .default_step_recover_strategy(max_retries(1).failover_to("failover-handler"))
            .add_step(noop("withdraw"))
            .add_step_with_recovery(noop("deposit"), max_retries(2).failover_to("compensate-withdraw"))
            .add_step(noop("compensate-withdraw"))
            .add_step(noop("failover-handler"))
            .build()
            .unwrap();

        let deposit = definition.resolve_recovery("deposit");
        assert_eq!(deposit.max_retries, 2);
        assert_eq!(deposit.failover_step.as_deref(), Some("compensate-withdraw"));

        let withdraw = definition.resolve_recovery("withdraw");
        assert_eq!(withdraw.max_retries, 1);
        assert_eq!(withdraw.failover_step.as_deref(), Some("failover-handler"));

        assert_eq!(
            definition.step_names().collect::<Vec<_>>(),
            vec!["withdraw", "deposit", "compensate-withdraw", "failover-handler"]
        );
    }

    #[test]
    fn test_add_step_with_recovery_overrides_step_strategy() {
        let definition = workflow()
            .add_step_with_recovery(
                noop("deposit").recover_strategy(max_retries(5).failover_to("deposit")),
                max_retries(1).failover_to("deposit"),
            )
            .build()
            .unwrap();
        assert_eq!(definition.resolve_recovery("deposit").max_retries, 1);
    }
}
