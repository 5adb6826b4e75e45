//! The workflow state machine.
//!
//! Given the persisted run state and one inbound event, the machine decides
//! the next run state and the side effects that must follow it. It never
//! persists, dispatches or reads a clock; the runtime interprets the
//! returned [`Decision`], persisting first.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::context::CommandContext;
use super::definition::WorkflowDefinition;
use super::effect::{ErrorCode, Reply, Transition};
use super::event::{StepCompletion, TimerFired, WorkflowEvent};
use super::state::{WorkflowRunState, WorkflowStatus};
use super::step::StepOutcome;
use super::timer::{TimerPayload, TimerRequest, WORKFLOW_TIMEOUT_TIMER};
use super::traits::Workflow;
use crate::{Result, WaypointError};

/// Request to invoke one step attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct StepDispatch {
    pub step: String,
    pub input: Option<serde_json::Value>,
    /// Fencing token the completion must carry.
    pub attempt: u64,
    pub timeout: Duration,
}

/// Outcome of handling one event.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision<S> {
    /// Run state to persist; `None` leaves the stored state untouched.
    pub state: Option<WorkflowRunState<S>>,
    /// Step attempt to start once `state` is persisted.
    pub dispatch: Option<StepDispatch>,
    /// Timer requests to apply once `state` is persisted.
    pub timers: Vec<TimerRequest>,
    /// Reply to the command that caused the decision.
    pub reply: Option<Reply>,
}

impl<S> Decision<S> {
    /// Nothing to do.
    pub fn unchanged() -> Self {
        Self {
            state: None,
            dispatch: None,
            timers: Vec::new(),
            reply: None,
        }
    }

    fn reply(reply: Reply) -> Self {
        Self {
            reply: Some(reply),
            ..Self::unchanged()
        }
    }

    /// Whether the decision has no effect at all.
    pub fn is_unchanged(&self) -> bool {
        self.state.is_none()
            && self.dispatch.is_none()
            && self.timers.is_empty()
            && self.reply.is_none()
    }
}

/// Decides transitions for instances of workflow `W`.
pub struct WorkflowMachine<'a, W: Workflow> {
    workflow: &'a W,
    definition: &'a WorkflowDefinition<W::State>,
    default_step_timeout: Duration,
}

impl<'a, W: Workflow> WorkflowMachine<'a, W> {
    pub fn new(
        workflow: &'a W,
        definition: &'a WorkflowDefinition<W::State>,
        default_step_timeout: Duration,
    ) -> Self {
        Self {
            workflow,
            definition,
            default_step_timeout,
        }
    }

    /// Handle any inbound event.
    ///
    /// `Err` is reserved for contract violations; everything recoverable is
    /// expressed in the returned decision.
    pub fn handle(
        &self,
        state: &WorkflowRunState<W::State>,
        event: WorkflowEvent<W::Command>,
    ) -> Result<Decision<W::State>> {
        match event {
            WorkflowEvent::Command(command) => self.handle_command(state, command),
            WorkflowEvent::StepCompleted(completion) => self.handle_step_result(state, completion),
            WorkflowEvent::TimerFired(fired) => self.handle_timer(state, fired),
        }
    }

    /// Run the command handler and resolve its effect.
    pub fn handle_command(
        &self,
        state: &WorkflowRunState<W::State>,
        command: W::Command,
    ) -> Result<Decision<W::State>> {
        let mut ctx = CommandContext::new(
            &state.workflow_id,
            state.status,
            state.current_step.as_deref(),
            state.user_state.as_ref(),
        );
        let result = self.workflow.handle_command(&mut ctx, command);
        let timers = ctx.into_timer_requests();

        let effect = match result {
            Ok(effect) => effect,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(Decision::reply(error_reply(&e))),
        };

        if let Some(msg) = effect.encode_error {
            return Err(WaypointError::ContractViolation(format!(
                "Command handler of workflow '{}' produced an unencodable {}",
                W::info().name,
                msg
            )));
        }

        if effect.reply.is_error() {
            return Ok(Decision::reply(effect.reply));
        }

        if state.is_terminal() {
            if effect.transition.is_some() || effect.update.is_some() {
                return Ok(Decision::reply(terminal_conflict(state)));
            }
            return Ok(Decision::reply(effect.reply));
        }

        let mut decision = Decision {
            timers,
            reply: Some(effect.reply),
            ..Decision::unchanged()
        };

        if let Some(transition) = effect.transition {
            let mut next = state.clone();
            if let Some(update) = effect.update {
                next.user_state = Some(update);
            }
            decision.dispatch = self.apply_transition(&mut next, transition, &mut decision.timers)?;
            decision.state = Some(next);
        }

        Ok(decision)
    }

    /// Resolve the completion of a step attempt.
    ///
    /// Completions that do not match the active step and attempt are
    /// discarded without touching the state.
    pub fn handle_step_result(
        &self,
        state: &WorkflowRunState<W::State>,
        completion: StepCompletion,
    ) -> Result<Decision<W::State>> {
        let current = match (state.status, state.current_step.as_deref()) {
            (WorkflowStatus::Running, Some(step))
                if step == completion.step && state.attempt == completion.attempt =>
            {
                step
            }
            _ => {
                debug!(
                    workflow = W::info().name,
                    workflow_id = %state.workflow_id,
                    step = %completion.step,
                    attempt = completion.attempt,
                    current_attempt = state.attempt,
                    status = state.status.as_str(),
                    "Discarding stale step completion"
                );
                return Ok(Decision::unchanged());
            }
        };

        let step = self.definition.find_step(current).ok_or_else(|| {
            WaypointError::ContractViolation(format!(
                "Step '{}' is not registered in workflow '{}'",
                current,
                W::info().name
            ))
        })?;

        match completion.outcome {
            StepOutcome::Success(value) => {
                let (result, timers) =
                    step.on_result(&state.workflow_id, state.user_state.as_ref(), value);
                let effect = match result {
                    Ok(effect) => effect,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => return self.recover(state, e.to_string()),
                };

                if let Some(msg) = effect.encode_error {
                    return Err(WaypointError::ContractViolation(format!(
                        "Step '{}' produced an unencodable {}",
                        current, msg
                    )));
                }

                let mut next = state.clone();
                if let Some(update) = effect.update {
                    next.user_state = Some(update);
                }
                let mut decision = Decision {
                    timers,
                    ..Decision::unchanged()
                };
                decision.dispatch =
                    self.apply_transition(&mut next, effect.transition, &mut decision.timers)?;

                debug!(
                    workflow = W::info().name,
                    workflow_id = %state.workflow_id,
                    step = current,
                    next_step = next.current_step.as_deref().unwrap_or("-"),
                    status = next.status.as_str(),
                    "Step completed"
                );

                decision.state = Some(next);
                Ok(decision)
            }
            StepOutcome::Failure(failure) => self.recover(state, failure.to_string()),
        }
    }

    /// Handle a fired timer.
    pub fn handle_timer(
        &self,
        state: &WorkflowRunState<W::State>,
        fired: TimerFired,
    ) -> Result<Decision<W::State>> {
        if state.is_terminal() {
            debug!(
                workflow = W::info().name,
                workflow_id = %state.workflow_id,
                timer = %fired.name,
                "Ignoring timer of a terminated workflow"
            );
            return Ok(Decision::unchanged());
        }

        match fired.payload {
            TimerPayload::WorkflowTimeout => self.handle_workflow_timeout(state),
            TimerPayload::Command(value) => {
                let command: W::Command = serde_json::from_value(value).map_err(|e| {
                    WaypointError::ContractViolation(format!(
                        "Timer '{}' delivered a payload that is not a command of workflow '{}': {}",
                        fired.name,
                        W::info().name,
                        e
                    ))
                })?;

                let mut decision = self.handle_command(state, command)?;
                if let Some(Reply::Error { description, .. }) = &decision.reply {
                    warn!(
                        workflow = W::info().name,
                        workflow_id = %state.workflow_id,
                        timer = %fired.name,
                        error = %description,
                        "Timer command rejected"
                    );
                }
                decision.reply = None;
                Ok(decision)
            }
        }
    }

    /// Re-dispatch the active step of an instance loaded in `Running` state.
    ///
    /// The attempt is bumped so completions of the lost attempt are discarded.
    pub fn resume(&self, state: &WorkflowRunState<W::State>) -> Option<Decision<W::State>> {
        if state.status != WorkflowStatus::Running {
            return None;
        }
        let mut next = state.clone();
        next.attempt += 1;
        let dispatch = self.dispatch_for(&next)?;
        Some(Decision {
            state: Some(next),
            dispatch: Some(dispatch),
            ..Decision::unchanged()
        })
    }

    /// Fail a run after a contract violation so it is never resumed.
    ///
    /// Idle and terminal runs are left as they are.
    pub fn abort(
        &self,
        state: &WorkflowRunState<W::State>,
        reason: String,
    ) -> Option<Decision<W::State>> {
        if state.status == WorkflowStatus::Idle || state.is_terminal() {
            return None;
        }
        let mut next = state.clone();
        let mut decision = Decision::unchanged();
        self.fail(&mut next, reason, &mut decision.timers);
        decision.state = Some(next);
        Some(decision)
    }

    fn handle_workflow_timeout(
        &self,
        state: &WorkflowRunState<W::State>,
    ) -> Result<Decision<W::State>> {
        if state.status == WorkflowStatus::Idle {
            return Ok(Decision::unchanged());
        }

        let mut next = state.clone();
        let mut decision = Decision::unchanged();

        match self.definition.failover() {
            Some(_) if state.recovering => {
                warn!(
                    workflow = W::info().name,
                    workflow_id = %state.workflow_id,
                    step = state.current_step.as_deref().unwrap_or("-"),
                    "Workflow timed out while its failover step is active"
                );
                return Ok(decision);
            }
            Some(failover) => {
                warn!(
                    workflow = W::info().name,
                    workflow_id = %state.workflow_id,
                    failover_step = %failover.step,
                    "Workflow timed out, failing over"
                );
                let transition = Transition::To {
                    step: failover.step.clone(),
                    input: failover.input.clone(),
                };
                decision.dispatch = self.apply_transition(&mut next, transition, &mut decision.timers)?;
                next.recovering = true;
            }
            None => {
                let timeout = self.definition.workflow_timeout().unwrap_or_default();
                self.fail(
                    &mut next,
                    format!("Workflow timed out after {:?}", timeout),
                    &mut decision.timers,
                );
            }
        }

        decision.state = Some(next);
        Ok(decision)
    }

    /// Retry, fail over, or fail the active step.
    fn recover(
        &self,
        state: &WorkflowRunState<W::State>,
        reason: String,
    ) -> Result<Decision<W::State>> {
        let step = state.current_step.clone().unwrap_or_default();
        let mut next = state.clone();
        let mut decision = Decision::unchanged();

        if state.recovering {
            let max_retries = self.definition.failover().map_or(0, |f| f.max_retries);
            if state.retry_count < max_retries {
                decision.dispatch = self.retry(&mut next, &reason);
            } else {
                self.fail(&mut next, reason, &mut decision.timers);
            }
        } else {
            let strategy = self.definition.resolve_recovery(&step);
            if state.retry_count < strategy.max_retries {
                decision.dispatch = self.retry(&mut next, &reason);
            } else if let Some(target) = strategy.failover_step {
                warn!(
                    workflow = W::info().name,
                    workflow_id = %state.workflow_id,
                    step = %step,
                    failover_step = %target,
                    error = %reason,
                    "Step retries exhausted, failing over"
                );
                let transition = Transition::To {
                    step: target,
                    input: strategy.failover_input,
                };
                decision.dispatch = self.apply_transition(&mut next, transition, &mut decision.timers)?;
            } else if let Some(failover) = self.definition.failover() {
                warn!(
                    workflow = W::info().name,
                    workflow_id = %state.workflow_id,
                    step = %step,
                    failover_step = %failover.step,
                    error = %reason,
                    "Step failed without a failover of its own, using workflow failover"
                );
                let transition = Transition::To {
                    step: failover.step.clone(),
                    input: failover.input.clone(),
                };
                decision.dispatch = self.apply_transition(&mut next, transition, &mut decision.timers)?;
                next.recovering = true;
            } else {
                self.fail(&mut next, reason, &mut decision.timers);
            }
        }

        decision.state = Some(next);
        Ok(decision)
    }

    fn retry(&self, next: &mut WorkflowRunState<W::State>, reason: &str) -> Option<StepDispatch> {
        next.attempt += 1;
        next.retry_count += 1;
        warn!(
            workflow = W::info().name,
            workflow_id = %next.workflow_id,
            step = next.current_step.as_deref().unwrap_or("-"),
            attempt = next.attempt,
            retry = next.retry_count,
            error = %reason,
            "Retrying step"
        );
        self.dispatch_for(next)
    }

    fn fail(
        &self,
        next: &mut WorkflowRunState<W::State>,
        reason: String,
        timers: &mut Vec<TimerRequest>,
    ) {
        error!(
            workflow = W::info().name,
            workflow_id = %next.workflow_id,
            step = next.current_step.as_deref().unwrap_or("-"),
            error = %reason,
            "Workflow failed without recovery"
        );
        next.status = WorkflowStatus::Failed;
        next.failure = Some(reason);
        next.attempt += 1;
        if self.definition.workflow_timeout().is_some() {
            timers.push(TimerRequest::Cancel {
                name: WORKFLOW_TIMEOUT_TIMER.to_string(),
            });
        }
    }

    fn apply_transition(
        &self,
        run: &mut WorkflowRunState<W::State>,
        transition: Transition,
        timers: &mut Vec<TimerRequest>,
    ) -> Result<Option<StepDispatch>> {
        let was_idle = run.status == WorkflowStatus::Idle;
        run.attempt += 1;
        run.retry_count = 0;
        run.recovering = false;

        let dispatch = match transition {
            Transition::To { step, input } => {
                if self.definition.find_step(&step).is_none() {
                    return Err(WaypointError::ContractViolation(format!(
                        "Transition to unknown step '{}' in workflow '{}'",
                        step,
                        W::info().name
                    )));
                }
                run.status = WorkflowStatus::Running;
                run.current_step = Some(step);
                run.step_input = input;
                self.dispatch_for(run)
            }
            Transition::Pause => {
                run.status = WorkflowStatus::Paused;
                None
            }
            Transition::End => {
                run.status = WorkflowStatus::Finished;
                run.current_step = None;
                run.step_input = None;
                None
            }
        };

        if let Some(timeout) = self.definition.workflow_timeout() {
            if run.is_terminal() {
                if !was_idle {
                    timers.push(TimerRequest::Cancel {
                        name: WORKFLOW_TIMEOUT_TIMER.to_string(),
                    });
                }
            } else if was_idle {
                timers.push(TimerRequest::Start {
                    name: WORKFLOW_TIMEOUT_TIMER.to_string(),
                    delay: timeout,
                    payload: TimerPayload::WorkflowTimeout,
                });
            }
        }

        if run.status == WorkflowStatus::Finished {
            info!(
                workflow = W::info().name,
                workflow_id = %run.workflow_id,
                "Workflow finished"
            );
        }

        Ok(dispatch)
    }

    fn dispatch_for(&self, run: &WorkflowRunState<W::State>) -> Option<StepDispatch> {
        let step = run.current_step.as_deref()?;
        Some(StepDispatch {
            step: step.to_string(),
            input: run.step_input.clone(),
            attempt: run.attempt,
            timeout: self.definition.step_timeout(step, self.default_step_timeout),
        })
    }
}

/// Reply to a state-changing command sent to an ended run.
fn terminal_conflict<S>(state: &WorkflowRunState<S>) -> Reply {
    let description = match (state.status, state.failure.as_deref()) {
        (WorkflowStatus::Failed, Some(reason)) => WaypointError::WorkflowFailed(format!(
            "'{}' stopped on: {}",
            state.workflow_id, reason
        ))
        .to_string(),
        (status, _) => format!("Workflow '{}' is {}", state.workflow_id, status.as_str()),
    };
    Reply::Error {
        description,
        code: ErrorCode::Conflict,
    }
}

fn error_reply(err: &WaypointError) -> Reply {
    match err {
        WaypointError::Validation(msg) => Reply::Error {
            description: msg.clone(),
            code: ErrorCode::BadRequest,
        },
        WaypointError::NotFound(msg) => Reply::Error {
            description: msg.clone(),
            code: ErrorCode::NotFound,
        },
        WaypointError::InvalidState(msg) => Reply::Error {
            description: msg.clone(),
            code: ErrorCode::Conflict,
        },
        other => Reply::Error {
            description: other.to_string(),
            code: ErrorCode::Internal,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::call::DeferredCall;
    use crate::workflow::context::CommandContext;
    use crate::workflow::definition::{workflow, BuildError};
    use crate::workflow::effect::{Effect, Effects};
    use crate::workflow::recovery::{max_retries, RecoverStrategy};
    use crate::workflow::step::{step, StepFailure};
    use crate::workflow::traits::WorkflowInfo;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        value: i64,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum Cmd {
        Start(i64),
        Pause,
        Resume,
        Finish,
        Query,
        Reject,
        Jump,
        Remind,
    }

    #[derive(Default)]
    struct Counting {
        first_retries: u32,
        step_failover: bool,
        workflow_failover: Option<u32>,
        timeout: Option<Duration>,
    }

    impl Workflow for Counting {
        type State = Counter;
        type Command = Cmd;

        fn info() -> WorkflowInfo {
            WorkflowInfo {
                name: "counting",
                version: 1,
            }
        }

        fn definition(&self) -> std::result::Result<WorkflowDefinition<Counter>, BuildError> {
            let first = step("first")
                .call(|_ctx, n: i64| DeferredCall::new("counter", "add", &n))
                .and_then(|_ctx, result: i64| {
                    if result < 0 {
                        return Err(WaypointError::StepFailed("negative".into()));
                    }
                    Ok(Effects::update_state(Counter { value: result }).transition_to("second", result))
                });
            let second = step("second")
                .call(|_ctx, n: i64| DeferredCall::new("counter", "double", &n))
                .and_then(|_ctx, result: i64| Ok(Effects::update_state(Counter { value: result }).end()));
            let handler = step("failover-handler")
                .call(|_ctx, _: ()| DeferredCall::new("counter", "reset", &()))
                .and_then(|_ctx, _: serde_json::Value| {
                    Ok(Effects::update_state(Counter { value: -1 }).end())
                });

            let strategy = if self.step_failover {
                max_retries(self.first_retries).failover_to_with_input("second", &0)
            } else {
                RecoverStrategy {
                    max_retries: self.first_retries,
                    ..RecoverStrategy::escalate()
                }
            };

            let mut builder = workflow()
                .add_step_with_recovery(first, strategy)
                .add_step(second)
                .add_step(handler);
            if let Some(retries) = self.workflow_failover {
                builder = builder.failover_to("failover-handler", max_retries(retries));
            }
            if let Some(timeout) = self.timeout {
                builder = builder.timeout(timeout);
            }
            builder.build()
        }

        fn empty_state(&self) -> Option<Counter> {
            Some(Counter { value: 0 })
        }

        fn handle_command(
            &self,
            ctx: &mut CommandContext<'_, Counter>,
            command: Cmd,
        ) -> Result<Effect<Counter>> {
            match command {
                Cmd::Start(n) => Ok(Effects::update_state(Counter { value: n })
                    .transition_to("first", n)
                    .then_reply("started")),
                Cmd::Pause => Ok(Effects::pause().then_reply("paused")),
                Cmd::Resume => {
                    let value = ctx.state().map_or(0, |s| s.value);
                    Ok(Effects::transition_to("second", value).then_reply("resumed"))
                }
                Cmd::Finish => Ok(Effects::end::<Counter>().into()),
                Cmd::Query => Ok(Effects::reply(ctx.state().map_or(0, |s| s.value))),
                Cmd::Reject => Err(WaypointError::Validation("rejected".into())),
                Cmd::Jump => Ok(Effects::transition_to_step::<Counter>("missing").into()),
                Cmd::Remind => {
                    ctx.timers()
                        .start_single_timer("reminder", Duration::from_secs(10), &Cmd::Resume)?;
                    Ok(Effects::reply("scheduled"))
                }
            }
        }
    }

    struct Harness {
        workflow: Counting,
        definition: WorkflowDefinition<Counter>,
    }

    impl Harness {
        fn new(workflow: Counting) -> Self {
            let definition = workflow.definition().unwrap();
            Self {
                workflow,
                definition,
            }
        }

        fn machine(&self) -> WorkflowMachine<'_, Counting> {
            WorkflowMachine::new(&self.workflow, &self.definition, Duration::from_secs(5))
        }

        fn idle(&self) -> WorkflowRunState<Counter> {
            WorkflowRunState::new("c1", self.workflow.empty_state())
        }

        fn started(&self) -> WorkflowRunState<Counter> {
            let decision = self
                .machine()
                .handle_command(&self.idle(), Cmd::Start(5))
                .unwrap();
            decision.state.unwrap()
        }

        fn command(&self, state: &WorkflowRunState<Counter>, cmd: Cmd) -> Decision<Counter> {
            self.machine().handle_command(state, cmd).unwrap()
        }

        fn complete(
            &self,
            state: &WorkflowRunState<Counter>,
            outcome: StepOutcome,
        ) -> Decision<Counter> {
            let completion = StepCompletion::new(
                state.current_step.clone().unwrap(),
                state.attempt,
                outcome,
            );
            self.machine().handle_step_result(state, completion).unwrap()
        }

        fn fail(&self, state: &WorkflowRunState<Counter>) -> WorkflowRunState<Counter> {
            self.complete(state, StepOutcome::Failure(StepFailure::Error("boom".into())))
                .state
                .unwrap()
        }
    }

    #[test]
    fn test_start_command_transitions_and_dispatches() {
        let h = Harness::new(Counting::default());
        let decision = h.command(&h.idle(), Cmd::Start(5));

        let state = decision.state.unwrap();
        assert_eq!(state.status, WorkflowStatus::Running);
        assert_eq!(state.current_step.as_deref(), Some("first"));
        assert_eq!(state.user_state, Some(Counter { value: 5 }));
        assert_eq!(state.attempt, 1);
        assert_eq!(
            decision.dispatch,
            Some(StepDispatch {
                step: "first".into(),
                input: Some(json!(5)),
                attempt: 1,
                timeout: Duration::from_secs(5),
            })
        );
        assert_eq!(
            decision.reply,
            Some(Reply::Message {
                payload: json!("started"),
                metadata: Default::default(),
            })
        );
        assert!(decision.timers.is_empty());
    }

    #[test]
    fn test_step_success_follows_transition() {
        let h = Harness::new(Counting::default());
        let state = h.started();
        let decision = h.complete(&state, StepOutcome::Success(json!(6)));

        let next = decision.state.unwrap();
        assert_eq!(next.current_step.as_deref(), Some("second"));
        assert_eq!(next.user_state, Some(Counter { value: 6 }));
        assert_eq!(next.attempt, 2);
        assert_eq!(next.retry_count, 0);
        assert_eq!(decision.dispatch.unwrap().input, Some(json!(6)));
        assert!(decision.reply.is_none());
    }

    #[test]
    fn test_transition_determinism() {
        let h = Harness::new(Counting::default());
        let state = h.started();
        let a = h.complete(&state, StepOutcome::Success(json!(6)));
        let b = h.complete(&state, StepOutcome::Success(json!(6)));
        assert_eq!(a, b);
    }

    #[test]
    fn test_stale_completion_rejected() {
        let h = Harness::new(Counting::default());
        let state = h.started();

        let old_attempt = StepCompletion::new("first", state.attempt - 1, StepOutcome::Success(json!(6)));
        assert!(h
            .machine()
            .handle_step_result(&state, old_attempt)
            .unwrap()
            .is_unchanged());

        let other_step = StepCompletion::new("second", state.attempt, StepOutcome::Success(json!(6)));
        assert!(h
            .machine()
            .handle_step_result(&state, other_step)
            .unwrap()
            .is_unchanged());

        // a retry supersedes the attempt that timed out
        let retried = {
            let h = Harness::new(Counting {
                first_retries: 1,
                ..Default::default()
            });
            let state = h.started();
            let next = h.complete(&state, StepOutcome::Failure(StepFailure::Timeout(Duration::from_secs(5))));
            let next = next.state.unwrap();
            let late = StepCompletion::new("first", state.attempt, StepOutcome::Success(json!(6)));
            h.machine().handle_step_result(&next, late).unwrap()
        };
        assert!(retried.is_unchanged());
    }

    #[test]
    fn test_retry_bound_then_step_failover() {
        let h = Harness::new(Counting {
            first_retries: 2,
            step_failover: true,
            ..Default::default()
        });
        let state = h.started();

        let first_retry = h.complete(&state, StepOutcome::Failure(StepFailure::Error("boom".into())));
        let dispatch = first_retry.dispatch.unwrap();
        assert_eq!(dispatch.step, "first");
        assert_eq!(dispatch.input, Some(json!(5)));
        let state = first_retry.state.unwrap();
        assert_eq!(state.retry_count, 1);
        assert_eq!(state.attempt, 2);

        let state = h.fail(&state);
        assert_eq!(state.current_step.as_deref(), Some("first"));
        assert_eq!(state.retry_count, 2);

        let failover = h.complete(&state, StepOutcome::Failure(StepFailure::Error("boom".into())));
        let state = failover.state.unwrap();
        assert_eq!(state.current_step.as_deref(), Some("second"));
        assert_eq!(state.retry_count, 0);
        assert!(!state.recovering);
        assert_eq!(failover.dispatch.unwrap().input, Some(json!(0)));
    }

    #[test]
    fn test_result_handler_error_counts_as_failure() {
        let h = Harness::new(Counting {
            first_retries: 1,
            ..Default::default()
        });
        let state = h.started();
        let decision = h.complete(&state, StepOutcome::Success(json!(-3)));
        let next = decision.state.unwrap();
        assert_eq!(next.current_step.as_deref(), Some("first"));
        assert_eq!(next.retry_count, 1);
    }

    #[test]
    fn test_unexpected_result_is_fatal() {
        let h = Harness::new(Counting::default());
        let state = h.started();
        let completion = StepCompletion::new("first", state.attempt, StepOutcome::Success(json!("six")));
        let result = h.machine().handle_step_result(&state, completion);
        assert!(matches!(result, Err(WaypointError::ContractViolation(_))));
    }

    #[test]
    fn test_workflow_failover_then_failed() {
        let h = Harness::new(Counting {
            workflow_failover: Some(1),
            ..Default::default()
        });
        let state = h.fail(&h.started());
        assert_eq!(state.current_step.as_deref(), Some("failover-handler"));
        assert!(state.recovering);
        assert_eq!(state.status, WorkflowStatus::Running);

        let state = h.fail(&state);
        assert_eq!(state.current_step.as_deref(), Some("failover-handler"));
        assert_eq!(state.retry_count, 1);

        let state = h.fail(&state);
        assert_eq!(state.status, WorkflowStatus::Failed);
        assert_eq!(state.failure.as_deref(), Some("boom"));
    }

    #[test]
    fn test_failover_step_success_ends_recovery() {
        let h = Harness::new(Counting {
            workflow_failover: Some(0),
            ..Default::default()
        });
        let state = h.fail(&h.started());
        let decision = h.complete(&state, StepOutcome::Success(json!(null)));
        let state = decision.state.unwrap();
        assert_eq!(state.status, WorkflowStatus::Finished);
        assert_eq!(state.user_state, Some(Counter { value: -1 }));
        assert!(!state.recovering);
    }

    #[test]
    fn test_unrecoverable_failure_without_handler() {
        let h = Harness::new(Counting {
            timeout: Some(Duration::from_secs(60)),
            ..Default::default()
        });
        let state = h.started();
        let decision = h.complete(&state, StepOutcome::Failure(StepFailure::Timeout(Duration::from_secs(5))));
        let next = decision.state.unwrap();
        assert_eq!(next.status, WorkflowStatus::Failed);
        assert_eq!(next.failure.as_deref(), Some("timed out after 5s"));
        assert!(decision.dispatch.is_none());
        assert_eq!(
            decision.timers,
            vec![TimerRequest::Cancel {
                name: WORKFLOW_TIMEOUT_TIMER.to_string()
            }]
        );
    }

    #[test]
    fn test_pause_resume_round_trip() {
        let h = Harness::new(Counting::default());
        let running = h.started();

        let paused = h.command(&running, Cmd::Pause).state.unwrap();
        assert_eq!(paused.status, WorkflowStatus::Paused);
        assert_eq!(paused.current_step.as_deref(), Some("first"));

        let late = StepCompletion::new("first", running.attempt, StepOutcome::Success(json!(6)));
        assert!(h.machine().handle_step_result(&paused, late).unwrap().is_unchanged());

        let decision = h.command(&paused, Cmd::Resume);
        let resumed = decision.state.unwrap();
        assert_eq!(resumed.status, WorkflowStatus::Running);
        assert_eq!(resumed.current_step.as_deref(), Some("second"));
        assert_eq!(decision.dispatch.unwrap().step, "second");
    }

    #[test]
    fn test_end_terminality() {
        let h = Harness::new(Counting {
            timeout: Some(Duration::from_secs(60)),
            ..Default::default()
        });
        let running = h.started();
        let decision = h.command(&running, Cmd::Finish);
        let finished = decision.state.unwrap();
        assert_eq!(finished.status, WorkflowStatus::Finished);
        assert!(finished.current_step.is_none());
        assert!(decision.timers.contains(&TimerRequest::Cancel {
            name: WORKFLOW_TIMEOUT_TIMER.to_string()
        }));

        let completion = StepCompletion::new("first", finished.attempt, StepOutcome::Success(json!(6)));
        assert!(h.machine().handle_step_result(&finished, completion).unwrap().is_unchanged());

        let fired = TimerFired {
            name: WORKFLOW_TIMEOUT_TIMER.to_string(),
            payload: TimerPayload::WorkflowTimeout,
        };
        assert!(h.machine().handle_timer(&finished, fired).unwrap().is_unchanged());

        let restart = h.command(&finished, Cmd::Start(1));
        assert!(restart.state.is_none());
        assert!(matches!(
            restart.reply,
            Some(Reply::Error {
                code: ErrorCode::Conflict,
                ..
            })
        ));

        let query = h.command(&finished, Cmd::Query);
        assert!(query.state.is_none());
        assert!(matches!(query.reply, Some(Reply::Message { .. })));
    }

    #[test]
    fn test_workflow_timeout_scheduled_on_start() {
        let h = Harness::new(Counting {
            timeout: Some(Duration::from_secs(60)),
            ..Default::default()
        });
        let decision = h.command(&h.idle(), Cmd::Start(5));
        assert_eq!(
            decision.timers,
            vec![TimerRequest::Start {
                name: WORKFLOW_TIMEOUT_TIMER.to_string(),
                delay: Duration::from_secs(60),
                payload: TimerPayload::WorkflowTimeout,
            }]
        );

        let next = decision.state.unwrap();
        let again = h.complete(&next, StepOutcome::Success(json!(6)));
        assert!(again.timers.is_empty());
    }

    #[test]
    fn test_workflow_timeout_uses_workflow_failover() {
        let h = Harness::new(Counting {
            workflow_failover: Some(0),
            timeout: Some(Duration::from_secs(60)),
            ..Default::default()
        });
        let paused = h.command(&h.started(), Cmd::Pause).state.unwrap();
        let fired = TimerFired {
            name: WORKFLOW_TIMEOUT_TIMER.to_string(),
            payload: TimerPayload::WorkflowTimeout,
        };
        let decision = h.machine().handle_timer(&paused, fired.clone()).unwrap();
        let state = decision.state.unwrap();
        assert_eq!(state.status, WorkflowStatus::Running);
        assert_eq!(state.current_step.as_deref(), Some("failover-handler"));
        assert!(state.recovering);

        // the failover step keeps control on a second delivery
        assert!(h.machine().handle_timer(&state, fired).unwrap().is_unchanged());
    }

    #[test]
    fn test_workflow_timeout_without_failover_fails() {
        let h = Harness::new(Counting {
            timeout: Some(Duration::from_secs(60)),
            ..Default::default()
        });
        let fired = TimerFired {
            name: WORKFLOW_TIMEOUT_TIMER.to_string(),
            payload: TimerPayload::WorkflowTimeout,
        };
        let state = h.machine().handle_timer(&h.started(), fired).unwrap().state.unwrap();
        assert_eq!(state.status, WorkflowStatus::Failed);
        assert_eq!(state.failure.as_deref(), Some("Workflow timed out after 60s"));
    }

    #[test]
    fn test_timer_delivers_command() {
        let h = Harness::new(Counting::default());
        let paused = h.command(&h.started(), Cmd::Pause).state.unwrap();

        let scheduled = h.command(&paused, Cmd::Remind);
        assert!(scheduled.state.is_none());
        let request = scheduled.timers.into_iter().next().unwrap();
        let payload = match request {
            TimerRequest::Start { payload, .. } => payload,
            other => panic!("Expected timer start, got {:?}", other),
        };

        let fired = TimerFired {
            name: "reminder".into(),
            payload,
        };
        let decision = h.machine().handle_timer(&paused, fired).unwrap();
        assert!(decision.reply.is_none());
        assert_eq!(decision.state.unwrap().current_step.as_deref(), Some("second"));
    }

    #[test]
    fn test_undecodable_timer_payload_is_fatal() {
        let h = Harness::new(Counting::default());
        let fired = TimerFired {
            name: "reminder".into(),
            payload: TimerPayload::Command(json!({"Unknown": 1})),
        };
        let result = h.machine().handle_timer(&h.started(), fired);
        assert!(matches!(result, Err(WaypointError::ContractViolation(_))));
    }

    #[test]
    fn test_command_error_becomes_error_reply() {
        let h = Harness::new(Counting::default());
        let decision = h.command(&h.idle(), Cmd::Reject);
        assert!(decision.state.is_none());
        assert_eq!(
            decision.reply,
            Some(Reply::Error {
                description: "rejected".into(),
                code: ErrorCode::BadRequest,
            })
        );
    }

    #[test]
    fn test_transition_to_unknown_step_is_fatal() {
        let h = Harness::new(Counting::default());
        let result = h.machine().handle_command(&h.started(), Cmd::Jump);
        assert!(matches!(result, Err(WaypointError::ContractViolation(_))));
    }

    #[test]
    fn test_resume_redispatches_with_new_attempt() {
        let h = Harness::new(Counting::default());
        let state = h.started();
        let decision = h.machine().resume(&state).unwrap();
        let dispatch = decision.dispatch.unwrap();
        assert_eq!(dispatch.step, "first");
        assert_eq!(dispatch.attempt, state.attempt + 1);
        assert_eq!(dispatch.input, Some(json!(5)));

        let paused = h.command(&state, Cmd::Pause).state.unwrap();
        assert!(h.machine().resume(&paused).is_none());
    }

    #[test]
    fn test_abort_fails_active_run() {
        let h = Harness::new(Counting {
            timeout: Some(Duration::from_secs(60)),
            ..Counting::default()
        });
        let state = h.started();

        let decision = h
            .machine()
            .abort(&state, "unexpected result".to_string())
            .unwrap();
        let failed = decision.state.unwrap();
        assert_eq!(failed.status, WorkflowStatus::Failed);
        assert_eq!(failed.failure.as_deref(), Some("unexpected result"));
        assert_eq!(failed.attempt, state.attempt + 1);
        assert!(decision.dispatch.is_none());
        assert_eq!(
            decision.timers,
            vec![TimerRequest::Cancel {
                name: WORKFLOW_TIMEOUT_TIMER.to_string(),
            }]
        );

        assert!(h.machine().abort(&h.idle(), "boom".into()).is_none());
        assert!(h.machine().abort(&failed, "boom".into()).is_none());
    }

    #[test]
    fn test_command_on_failed_run_reports_failure() {
        let h = Harness::new(Counting::default());
        let failed = h.fail(&h.started());
        assert_eq!(failed.status, WorkflowStatus::Failed);

        let decision = h.command(&failed, Cmd::Resume);
        assert!(decision.state.is_none());
        assert_eq!(
            decision.reply,
            Some(Reply::Error {
                description: "Workflow failed: 'c1' stopped on: boom".into(),
                code: ErrorCode::Conflict,
            })
        );

        let decision = h.command(&failed, Cmd::Query);
        assert!(!decision.reply.unwrap().is_error());
    }

    #[test]
    fn test_handle_routes_events() {
        let h = Harness::new(Counting::default());
        let state = h.started();
        let event = WorkflowEvent::StepCompleted(StepCompletion::new(
            "first",
            state.attempt,
            StepOutcome::Success(json!(6)),
        ));
        let decision = h.machine().handle(&state, event).unwrap();
        assert_eq!(
            decision.state.unwrap().current_step.as_deref(),
            Some("second")
        );
    }
}
