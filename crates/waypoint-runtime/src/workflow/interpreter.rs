//! Carries out the decisions of the state machine.
//!
//! Order is fixed: persist the new run state, then apply timer requests,
//! then dispatch the next step attempt, then hand back the reply. Nothing
//! that depends on a state change becomes observable before the change is
//! saved.

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use waypoint_core::workflow::{
    Decision, DeferredCall, ErrorCode, Reply, StepCompletion, StepDispatch, StepFailure,
    StepOutcome, TimerCallback, TimerFired, TimerKey, TimerPayload, TimerRequest, Workflow,
    WorkflowStatus, WORKFLOW_TIMEOUT_TIMER,
};
use waypoint_core::{Result, WaypointError};

use super::dispatch::run_step;
use super::instance::{Instance, Message};
use super::runtime::WorkflowRuntime;

impl<W: Workflow> Instance<W> {
    /// Apply a decision and return the reply it carries.
    pub(super) async fn apply(&mut self, decision: Decision<W::State>) -> Result<Option<Reply>> {
        let Decision {
            state,
            dispatch,
            timers,
            reply,
        } = decision;

        if let Some(mut next) = state {
            if next.started_at.is_none() && next.status != WorkflowStatus::Idle {
                next.started_at = Some(Utc::now());
            }
            let record = next.encode().map_err(|e| {
                WaypointError::ContractViolation(format!("Workflow state cannot be encoded: {}", e))
            })?;
            self.shared.store.save(W::info().name, &record).await?;

            debug!(
                workflow = W::info().name,
                workflow_id = %self.workflow_id,
                status = next.status.as_str(),
                step = next.current_step.as_deref().unwrap_or("-"),
                attempt = next.attempt,
                "Persisted workflow state"
            );
            self.state = Some(next);
        }

        for request in timers {
            self.apply_timer(request);
        }

        if let Some(dispatch) = dispatch {
            self.dispatch(dispatch)?;
        }

        Ok(reply)
    }

    /// Resume an interrupted run: re-dispatch the active step and re-arm
    /// what is left of the workflow timeout.
    pub(super) async fn recover(&mut self) -> Result<()> {
        let Some(state) = self.state.as_ref() else {
            return Ok(());
        };
        let started_at = state.started_at;
        let mut decision = self
            .shared
            .machine()
            .resume(state)
            .unwrap_or_else(Decision::unchanged);

        if let Some(timeout) = self.shared.definition.workflow_timeout() {
            let elapsed = started_at
                .and_then(|t| (Utc::now() - t).to_std().ok())
                .unwrap_or_default();
            decision.timers.push(TimerRequest::Start {
                name: WORKFLOW_TIMEOUT_TIMER.to_string(),
                delay: timeout.saturating_sub(elapsed),
                payload: TimerPayload::WorkflowTimeout,
            });
        }

        self.apply(decision).await?;
        Ok(())
    }

    /// Record a contract violation as the failure of the run.
    pub(super) async fn abort(&mut self, err: &WaypointError) {
        let Some(state) = self.state.as_ref() else {
            return;
        };
        let Some(decision) = self.shared.machine().abort(state, err.to_string()) else {
            return;
        };
        if let Err(e) = self.apply(decision).await {
            error!(
                workflow = W::info().name,
                workflow_id = %self.workflow_id,
                error = %e,
                "Failed to record workflow failure"
            );
        }
    }

    fn dispatch(&self, dispatch: StepDispatch) -> Result<()> {
        let step = self
            .shared
            .definition
            .find_step(&dispatch.step)
            .ok_or_else(|| {
                WaypointError::ContractViolation(format!(
                    "Step '{}' is not registered in workflow '{}'",
                    dispatch.step,
                    W::info().name
                ))
            })?;

        let user_state = self.state.as_ref().and_then(|s| s.user_state.as_ref());
        let (invocation, timers) = step.invoke(&self.workflow_id, user_state, dispatch.input.clone());
        for request in timers {
            self.apply_timer(request);
        }

        let invocation = match invocation {
            Ok(invocation) => invocation,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(
                    workflow = W::info().name,
                    workflow_id = %self.workflow_id,
                    step = %dispatch.step,
                    attempt = dispatch.attempt,
                    error = %e,
                    "Step invocation failed"
                );
                let outcome = StepOutcome::Failure(StepFailure::Error(e.to_string()));
                self.complete_later(StepCompletion::new(dispatch.step, dispatch.attempt, outcome));
                return Ok(());
            }
        };

        debug!(
            workflow = W::info().name,
            workflow_id = %self.workflow_id,
            step = %dispatch.step,
            kind = step.kind().as_str(),
            attempt = dispatch.attempt,
            timeout_ms = dispatch.timeout.as_millis() as u64,
            "Dispatching step"
        );

        let executor = self.shared.executor.clone();
        let mailbox = self.mailbox.clone();
        let cancel = self.shared.shutdown.child_token();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return,
                outcome = run_step(executor, invocation, dispatch.timeout) => outcome,
            };
            if let Some(mailbox) = mailbox.upgrade() {
                let completion = StepCompletion::new(dispatch.step, dispatch.attempt, outcome);
                let _ = mailbox.send(Message::StepCompleted(completion)).await;
            }
        });

        Ok(())
    }

    fn complete_later(&self, completion: StepCompletion) {
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            if let Some(mailbox) = mailbox.upgrade() {
                let _ = mailbox.send(Message::StepCompleted(completion)).await;
            }
        });
    }

    fn apply_timer(&self, request: TimerRequest) {
        let key = TimerKey::new(W::info().name, self.workflow_id.clone(), request.name());
        match request {
            TimerRequest::Start {
                name,
                delay,
                payload,
            } => {
                let runtime = self.runtime.clone();
                let workflow_id = self.workflow_id.clone();
                let callback: TimerCallback = Box::new(move || -> BoxFuture<'static, ()> {
                    Box::pin(async move {
                        let Some(inner) = runtime.upgrade() else {
                            return;
                        };
                        let runtime = WorkflowRuntime::from_inner(inner);
                        let message = Message::TimerFired(TimerFired {
                            name: name.clone(),
                            payload,
                        });
                        if let Err(e) = runtime.deliver(&workflow_id, message).await {
                            warn!(
                                workflow = W::info().name,
                                workflow_id = %workflow_id,
                                timer = %name,
                                error = %e,
                                "Failed to deliver timer"
                            );
                        }
                    })
                });
                self.shared.timers.start_single_timer(key, delay, callback);
            }
            TimerRequest::Cancel { .. } => self.shared.timers.cancel(&key),
        }
    }

    /// Let a deferred call produce the reply of a command.
    pub(super) fn forward(&self, call: DeferredCall, reply: oneshot::Sender<Result<Reply>>) {
        let executor = self.shared.executor.clone();
        let timeout = self.shared.config.default_step_timeout();
        tokio::spawn(async move {
            let metadata = call.metadata.clone();
            let result = match tokio::time::timeout(timeout, executor.execute(call)).await {
                Ok(Ok(payload)) => Reply::Message { payload, metadata },
                Ok(Err(e)) => Reply::Error {
                    description: e.to_string(),
                    code: ErrorCode::Internal,
                },
                Err(_) => Reply::Error {
                    description: format!("Forwarded call timed out after {:?}", timeout),
                    code: ErrorCode::Internal,
                },
            };
            let _ = reply.send(Ok(result));
        });
    }
}
