//! Per-instance actor.
//!
//! Every workflow instance owns one task and one bounded mailbox. Commands,
//! step completions and timer deliveries for the instance are handled one at
//! a time, in arrival order. The actor stops when nothing is in flight or
//! on an error; the next delivery spawns it again.

use std::ops::ControlFlow;
use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use waypoint_core::workflow::{
    Reply, StepCompletion, TimerFired, Workflow, WorkflowEvent, WorkflowRunState, WorkflowStatus,
};
use waypoint_core::{Result, WaypointError};

use super::runtime::{RuntimeInner, Shared};

/// Mailbox message of a workflow instance.
pub(crate) enum Message<W: Workflow> {
    Command {
        command: W::Command,
        reply: oneshot::Sender<Result<Reply>>,
    },
    StepCompleted(StepCompletion),
    TimerFired(TimerFired),
    /// Load the instance, resuming an interrupted run.
    Wake,
}

/// Error owed to the caller of the command that stopped the actor.
type PendingError = (oneshot::Sender<Result<Reply>>, WaypointError);

pub(crate) struct Instance<W: Workflow> {
    pub(super) shared: Arc<Shared<W>>,
    pub(super) runtime: Weak<RuntimeInner<W>>,
    pub(super) mailbox: mpsc::WeakSender<Message<W>>,
    pub(super) workflow_id: String,
    pub(super) state: Option<WorkflowRunState<W::State>>,
}

impl<W: Workflow> Instance<W> {
    /// Spawn the actor and return its mailbox.
    pub(crate) fn spawn(
        shared: Arc<Shared<W>>,
        runtime: Weak<RuntimeInner<W>>,
        workflow_id: String,
    ) -> mpsc::Sender<Message<W>> {
        let (tx, rx) = mpsc::channel(shared.config.mailbox_capacity);
        let instance = Self {
            shared,
            runtime,
            mailbox: tx.downgrade(),
            workflow_id,
            state: None,
        };
        tokio::spawn(instance.run(rx));
        tx
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Message<W>>) {
        debug!(
            workflow = W::info().name,
            workflow_id = %self.workflow_id,
            "Workflow instance started"
        );

        let shutdown = self.shared.shutdown.clone();
        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => break,
                message = rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            match self.receive(message).await {
                ControlFlow::Break(pending) => {
                    // Closed before replying so the next caller respawns the actor.
                    rx.close();
                    if let Some((reply, err)) = pending {
                        let _ = reply.send(Err(err));
                    }
                    break;
                }
                ControlFlow::Continue(()) if self.is_at_rest() => {
                    rx.close();
                    self.drain(&mut rx).await;
                    break;
                }
                ControlFlow::Continue(()) => {}
            }
        }

        self.release().await;
        debug!(
            workflow = W::info().name,
            workflow_id = %self.workflow_id,
            "Workflow instance stopped"
        );
    }

    async fn receive(&mut self, message: Message<W>) -> ControlFlow<Option<PendingError>> {
        match message {
            Message::Command { command, reply } => {
                match self.process(WorkflowEvent::Command(command)).await {
                    Ok(Some(Reply::Forward(call))) => {
                        self.forward(call, reply);
                        ControlFlow::Continue(())
                    }
                    Ok(result) => {
                        let _ = reply.send(Ok(result.unwrap_or(Reply::Empty)));
                        ControlFlow::Continue(())
                    }
                    Err(e) => {
                        self.halt(&e).await;
                        ControlFlow::Break(Some((reply, e)))
                    }
                }
            }
            Message::StepCompleted(completion) => {
                let result = self.process(WorkflowEvent::StepCompleted(completion)).await;
                self.settle(result.map(|_| ())).await
            }
            Message::TimerFired(fired) => {
                let result = self.process(WorkflowEvent::TimerFired(fired)).await;
                self.settle(result.map(|_| ())).await
            }
            Message::Wake => {
                let result = self.ensure_loaded().await;
                self.settle(result).await
            }
        }
    }

    /// Answer what was queued before the mailbox closed.
    async fn drain(&mut self, rx: &mut mpsc::Receiver<Message<W>>) {
        while let Some(message) = rx.recv().await {
            if let ControlFlow::Break(Some((reply, err))) = self.receive(message).await {
                let _ = reply.send(Err(err));
            }
        }
    }

    async fn release(&self) {
        let (Some(runtime), Some(mailbox)) = (self.runtime.upgrade(), self.mailbox.upgrade())
        else {
            return;
        };
        runtime.release(&self.workflow_id, &mailbox).await;
    }

    /// Nothing is in flight: the run has ended or never started.
    fn is_at_rest(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|state| state.status == WorkflowStatus::Idle || state.is_terminal())
    }

    async fn process(&mut self, event: WorkflowEvent<W::Command>) -> Result<Option<Reply>> {
        self.ensure_loaded().await?;
        let state = self.state.as_ref().ok_or_else(|| {
            WaypointError::Internal(format!("Workflow instance '{}' has no state", self.workflow_id))
        })?;
        let decision = self.shared.machine().handle(state, event)?;
        self.apply(decision).await
    }

    /// Load the persisted state on first use. A run interrupted while
    /// `Running` or `Paused` is resumed.
    async fn ensure_loaded(&mut self) -> Result<()> {
        if self.state.is_some() {
            return Ok(());
        }

        let record = self
            .shared
            .store
            .load(W::info().name, &self.workflow_id)
            .await?;
        let state = match record {
            Some(record) => record.decode::<W::State>()?,
            None => WorkflowRunState::new(self.workflow_id.clone(), self.shared.workflow.empty_state()),
        };

        let interrupted = matches!(state.status, WorkflowStatus::Running | WorkflowStatus::Paused);
        if interrupted {
            info!(
                workflow = W::info().name,
                workflow_id = %self.workflow_id,
                status = state.status.as_str(),
                step = state.current_step.as_deref().unwrap_or("-"),
                "Recovering workflow instance"
            );
        }

        self.state = Some(state);
        if interrupted {
            self.recover().await?;
        }
        Ok(())
    }

    async fn settle(&mut self, result: Result<()>) -> ControlFlow<Option<PendingError>> {
        match result {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) => {
                self.halt(&e).await;
                ControlFlow::Break(None)
            }
        }
    }

    /// A contract violation also fails the run, so loading it again does
    /// not replay the step that broke.
    async fn halt(&mut self, err: &WaypointError) {
        self.log_stop(err);
        if err.is_fatal() {
            self.abort(err).await;
        }
    }

    fn log_stop(&self, err: &WaypointError) {
        if err.is_fatal() {
            error!(
                workflow = W::info().name,
                workflow_id = %self.workflow_id,
                error = %err,
                "Contract violation, stopping workflow instance"
            );
        } else {
            error!(
                workflow = W::info().name,
                workflow_id = %self.workflow_id,
                error = %err,
                "Stopping workflow instance"
            );
        }
    }
}
