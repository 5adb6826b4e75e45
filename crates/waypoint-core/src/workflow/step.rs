//! Step definitions.
//!
//! A step pairs an invocation with a result handler:
//!
//! ```ignore
//! let withdraw = step("withdraw")
//!     .call(|_ctx, cmd: Withdraw| DeferredCall::new(format!("wallet/{}", cmd.from), "withdraw", &cmd.amount))
//!     .and_then(|ctx, result: WithdrawResult| {
//!         let state = ctx.current_state()?;
//!         match result {
//!             WithdrawResult::Succeeded => Ok(Effects::update_state(state.with_status(WithdrawSucceed))
//!                 .transition_to("deposit", Deposit::from(state))),
//!             WithdrawResult::Failed { .. } => Ok(Effects::update_state(state.with_status(WithdrawFailed)).end()),
//!         }
//!     });
//! ```
//!
//! Inputs and results cross the step boundary as JSON; a value that does not
//! decode into the declared type is a contract violation, not a step failure.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Serialize};

use super::call::DeferredCall;
use super::context::StepContext;
use super::effect::TransitionalEffect;
use super::recovery::RecoverStrategy;
use super::timer::TimerRequest;
use crate::{Result, WaypointError};

/// How a step performs its work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Produces a [`DeferredCall`] run by the step executor.
    Call,
    /// Produces a future run by the runtime.
    AsyncCall,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::AsyncCall => "async_call",
        }
    }
}

/// Work produced by invoking a step.
pub enum StepInvocation {
    Deferred(DeferredCall),
    Async(BoxFuture<'static, Result<serde_json::Value>>),
}

impl fmt::Debug for StepInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deferred(call) => f.debug_tuple("Deferred").field(call).finish(),
            Self::Async(_) => f.write_str("Async(..)"),
        }
    }
}

/// Why a step attempt failed.
#[derive(Debug, Clone, PartialEq)]
pub enum StepFailure {
    /// The invocation returned an error.
    Error(String),
    /// The invocation did not complete in time.
    Timeout(Duration),
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(msg) => write!(f, "{}", msg),
            Self::Timeout(after) => write!(f, "timed out after {:?}", after),
        }
    }
}

/// Outcome of one step attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Success(serde_json::Value),
    Failure(StepFailure),
}

type InvokeFn<S> =
    Arc<dyn Fn(&mut StepContext<'_, S>, serde_json::Value) -> Result<StepInvocation> + Send + Sync>;

type ThenFn<S> = Arc<
    dyn Fn(&mut StepContext<'_, S>, serde_json::Value) -> Result<TransitionalEffect<S>>
        + Send
        + Sync,
>;

/// An immutable workflow step.
pub struct Step<S> {
    name: String,
    kind: StepKind,
    invoke: InvokeFn<S>,
    then: ThenFn<S>,
    timeout: Option<Duration>,
    recover_strategy: Option<RecoverStrategy>,
}

impl<S> Clone for Step<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            kind: self.kind,
            invoke: self.invoke.clone(),
            then: self.then.clone(),
            timeout: self.timeout,
            recover_strategy: self.recover_strategy.clone(),
        }
    }
}

impl<S> fmt::Debug for Step<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("timeout", &self.timeout)
            .field("recover_strategy", &self.recover_strategy)
            .finish()
    }
}

impl<S> Step<S> {
    /// Override the definition's default step timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Override the definition's default recover strategy.
    pub fn recover_strategy(mut self, strategy: RecoverStrategy) -> Self {
        self.recover_strategy = Some(strategy);
        self
    }

    /// Get step name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get step kind.
    pub fn kind(&self) -> StepKind {
        self.kind
    }

    /// Get the step-specific timeout.
    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Get the step-specific recover strategy.
    pub fn get_recover_strategy(&self) -> Option<&RecoverStrategy> {
        self.recover_strategy.as_ref()
    }

    /// Invoke the step with its serialized input.
    ///
    /// Returns the work to run plus any timer requests the invocation made.
    pub fn invoke(
        &self,
        workflow_id: &str,
        state: Option<&S>,
        input: Option<serde_json::Value>,
    ) -> (Result<StepInvocation>, Vec<TimerRequest>) {
        let mut ctx = StepContext::new(workflow_id, &self.name, state);
        let result = (self.invoke)(&mut ctx, input.unwrap_or(serde_json::Value::Null));
        (result, ctx.into_timer_requests())
    }

    /// Run the result handler on a successful outcome.
    pub(crate) fn on_result(
        &self,
        workflow_id: &str,
        state: Option<&S>,
        value: serde_json::Value,
    ) -> (Result<TransitionalEffect<S>>, Vec<TimerRequest>) {
        let mut ctx = StepContext::new(workflow_id, &self.name, state);
        let result = (self.then)(&mut ctx, value);
        (result, ctx.into_timer_requests())
    }
}

/// Begin a step definition.
pub fn step(name: impl Into<String>) -> StepBuilder {
    StepBuilder { name: name.into() }
}

/// A named step awaiting its invocation.
#[derive(Debug, Clone)]
pub struct StepBuilder {
    name: String,
}

impl StepBuilder {
    /// Invoke by describing a deferred call.
    pub fn call<S, I, F>(self, f: F) -> PendingStep<S>
    where
        S: 'static,
        I: DeserializeOwned + 'static,
        F: Fn(&mut StepContext<'_, S>, I) -> Result<DeferredCall> + Send + Sync + 'static,
    {
        let invoke: InvokeFn<S> = Arc::new(
            move |ctx: &mut StepContext<'_, S>, input: serde_json::Value| {
                let input = decode::<I>(ctx.step_name(), "input", input)?;
                f(ctx, input).map(StepInvocation::Deferred)
            },
        );

        PendingStep {
            name: self.name,
            kind: StepKind::Call,
            invoke,
        }
    }

    /// Invoke by running an async computation.
    pub fn async_call<S, I, O, F, Fut>(self, f: F) -> PendingStep<S>
    where
        S: 'static,
        I: DeserializeOwned + 'static,
        O: Serialize + 'static,
        F: Fn(&mut StepContext<'_, S>, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        let invoke: InvokeFn<S> = Arc::new(
            move |ctx: &mut StepContext<'_, S>, input: serde_json::Value| {
                let input = decode::<I>(ctx.step_name(), "input", input)?;
                let fut = f(ctx, input);
                Ok(StepInvocation::Async(Box::pin(async move {
                    let output = fut.await?;
                    Ok(serde_json::to_value(output)?)
                })))
            },
        );

        PendingStep {
            name: self.name,
            kind: StepKind::AsyncCall,
            invoke,
        }
    }
}

/// A step with an invocation, awaiting its result handler.
pub struct PendingStep<S> {
    name: String,
    kind: StepKind,
    invoke: InvokeFn<S>,
}

impl<S: 'static> PendingStep<S> {
    /// Handle the step's result and decide the next transition.
    pub fn and_then<O, F>(self, f: F) -> Step<S>
    where
        O: DeserializeOwned + 'static,
        F: Fn(&mut StepContext<'_, S>, O) -> Result<TransitionalEffect<S>> + Send + Sync + 'static,
    {
        let then: ThenFn<S> = Arc::new(
            move |ctx: &mut StepContext<'_, S>, value: serde_json::Value| {
                let result = decode::<O>(ctx.step_name(), "result", value)?;
                f(ctx, result)
            },
        );

        Step {
            name: self.name,
            kind: self.kind,
            invoke: self.invoke,
            then,
            timeout: None,
            recover_strategy: None,
        }
    }
}

fn decode<T: DeserializeOwned>(step: &str, what: &str, value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| {
        WaypointError::ContractViolation(format!(
            "Step '{}' received a {} it cannot decode: {}",
            step, what, e
        ))
    })
}
