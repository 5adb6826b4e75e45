use super::state::WorkflowStatus;
use super::timer::{TimerRequest, Timers};
use crate::{Result, WaypointError};

/// Context available to step invocations and result handlers.
pub struct StepContext<'a, S> {
    workflow_id: &'a str,
    step: &'a str,
    state: Option<&'a S>,
    timers: Timers,
}

impl<'a, S> StepContext<'a, S> {
    pub(crate) fn new(workflow_id: &'a str, step: &'a str, state: Option<&'a S>) -> Self {
        Self {
            workflow_id,
            step,
            state,
            timers: Timers::default(),
        }
    }

    /// Id of the running workflow instance.
    pub fn workflow_id(&self) -> &'a str {
        self.workflow_id
    }

    /// Name of the step being run.
    pub fn step_name(&self) -> &'a str {
        self.step
    }

    /// Current user state, `None` while the workflow has no state.
    pub fn state(&self) -> Option<&'a S> {
        self.state
    }

    /// Current user state, failing when there is none.
    pub fn current_state(&self) -> Result<&'a S> {
        self.state.ok_or_else(|| {
            WaypointError::InvalidState(format!(
                "Step '{}' of workflow '{}' ran without state",
                self.step, self.workflow_id
            ))
        })
    }

    /// Timers of this workflow instance.
    pub fn timers(&mut self) -> &mut Timers {
        &mut self.timers
    }

    pub(crate) fn into_timer_requests(self) -> Vec<TimerRequest> {
        self.timers.into_requests()
    }
}

/// Context available to command handlers.
pub struct CommandContext<'a, S> {
    workflow_id: &'a str,
    status: WorkflowStatus,
    current_step: Option<&'a str>,
    state: Option<&'a S>,
    timers: Timers,
}

impl<'a, S> CommandContext<'a, S> {
    pub(crate) fn new(
        workflow_id: &'a str,
        status: WorkflowStatus,
        current_step: Option<&'a str>,
        state: Option<&'a S>,
    ) -> Self {
        Self {
            workflow_id,
            status,
            current_step,
            state,
            timers: Timers::default(),
        }
    }

    /// Id of the workflow instance receiving the command.
    pub fn workflow_id(&self) -> &'a str {
        self.workflow_id
    }

    /// Lifecycle status before the command.
    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    /// Active (or paused) step, if any.
    pub fn current_step(&self) -> Option<&'a str> {
        self.current_step
    }

    /// Current user state, `None` before the workflow is started.
    pub fn state(&self) -> Option<&'a S> {
        self.state
    }

    /// Timers of this workflow instance.
    pub fn timers(&mut self) -> &mut Timers {
        &mut self.timers
    }

    pub(crate) fn into_timer_requests(self) -> Vec<TimerRequest> {
        self.timers.into_requests()
    }
}
