//! Named, delayed callbacks scheduled by workflows.
//!
//! Handlers and steps never touch the timer facility directly. They record
//! [`TimerRequest`]s through [`Timers`]; the runtime applies them after the
//! state they were issued with is persisted.

use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;

use crate::{Result, WaypointError};

/// Name of the timer bounding a whole workflow run.
pub const WORKFLOW_TIMEOUT_TIMER: &str = "waypoint.workflow-timeout";

/// What a timer delivers when it fires.
#[derive(Debug, Clone, PartialEq)]
pub enum TimerPayload {
    /// Serialized command for the owning workflow instance.
    Command(serde_json::Value),
    /// The workflow-level timeout.
    WorkflowTimeout,
}

/// A timer operation requested by a handler, step, or the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum TimerRequest {
    Start {
        name: String,
        delay: Duration,
        payload: TimerPayload,
    },
    Cancel {
        name: String,
    },
}

impl TimerRequest {
    /// Timer name the request refers to.
    pub fn name(&self) -> &str {
        match self {
            Self::Start { name, .. } | Self::Cancel { name } => name,
        }
    }
}

/// Timer requests collected while a handler or step runs.
#[derive(Debug, Default)]
pub struct Timers {
    requests: Vec<TimerRequest>,
}

impl Timers {
    /// Schedule `command` to be delivered to this workflow instance after
    /// `delay`. A timer with the same name is replaced.
    pub fn start_single_timer<C: Serialize>(
        &mut self,
        name: impl Into<String>,
        delay: Duration,
        command: &C,
    ) -> Result<()> {
        let name = name.into();
        if name.starts_with("waypoint.") {
            return Err(WaypointError::Validation(format!(
                "Timer name '{}' uses the reserved 'waypoint.' prefix",
                name
            )));
        }
        let payload = TimerPayload::Command(serde_json::to_value(command)?);
        self.requests.push(TimerRequest::Start {
            name,
            delay,
            payload,
        });
        Ok(())
    }

    /// Cancel a previously started timer. Unknown names are ignored.
    pub fn cancel(&mut self, name: impl Into<String>) {
        self.requests.push(TimerRequest::Cancel { name: name.into() });
    }

    /// Requests recorded so far.
    pub fn requests(&self) -> &[TimerRequest] {
        &self.requests
    }

    pub(crate) fn into_requests(self) -> Vec<TimerRequest> {
        self.requests
    }
}

/// Identity of a scheduled timer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub workflow: String,
    pub workflow_id: String,
    pub name: String,
}

impl TimerKey {
    pub fn new(
        workflow: impl Into<String>,
        workflow_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            workflow: workflow.into(),
            workflow_id: workflow_id.into(),
            name: name.into(),
        }
    }
}

/// Callback run when a timer fires.
pub type TimerCallback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send + 'static>;

/// Schedules and cancels named single-shot timers.
///
/// Delivery is at-least-once from the workflow's point of view: a timer
/// cancelled while firing may still be delivered, so receivers must tolerate
/// stale deliveries.
pub trait TimerFacility: Send + Sync + 'static {
    /// Schedule `callback` after `delay`, replacing any timer with the same key.
    fn start_single_timer(&self, key: TimerKey, delay: Duration, callback: TimerCallback);

    /// Cancel the timer with `key`, if any.
    fn cancel(&self, key: &TimerKey);
}
