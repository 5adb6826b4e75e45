use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{Result, WaypointError};

/// Workflow lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    /// No transition has happened yet.
    Idle,
    /// A step is active.
    Running,
    /// Waiting for a command to transition again.
    Paused,
    /// Ended through `end()`.
    Finished,
    /// Recovery was exhausted.
    Failed,
}

impl WorkflowStatus {
    /// Convert to string for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }

    /// Check if the workflow is terminal (no longer running).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

impl FromStr for WorkflowStatus {
    type Err = WaypointError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "finished" => Ok(Self::Finished),
            "failed" => Ok(Self::Failed),
            other => Err(WaypointError::Deserialization(format!(
                "Unknown workflow status '{}'",
                other
            ))),
        }
    }
}

/// Persisted state of one workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRunState<S> {
    /// Instance id.
    pub workflow_id: String,
    /// Lifecycle status.
    pub status: WorkflowStatus,
    /// Active step; kept while paused, cleared by `end()`.
    pub current_step: Option<String>,
    /// Input of the active step, reused on retry.
    pub step_input: Option<serde_json::Value>,
    /// The workflow's own state.
    pub user_state: Option<S>,
    /// Fencing token of the current step attempt. Bumped on every
    /// transition, retry and failover.
    pub attempt: u64,
    /// Retries spent on the active step.
    pub retry_count: u32,
    /// Whether the active step was entered through the workflow-level failover.
    pub recovering: bool,
    /// Reason of an unrecoverable failure.
    pub failure: Option<String>,
    /// When the first transition was persisted.
    pub started_at: Option<DateTime<Utc>>,
}

/// Serialized form handed to the persistence boundary.
pub type WorkflowRecord = WorkflowRunState<serde_json::Value>;

impl<S> WorkflowRunState<S> {
    /// Fresh, idle state.
    pub fn new(workflow_id: impl Into<String>, user_state: Option<S>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            status: WorkflowStatus::Idle,
            current_step: None,
            step_input: None,
            user_state,
            attempt: 0,
            retry_count: 0,
            recovering: false,
            failure: None,
            started_at: None,
        }
    }

    /// Whether the workflow has ended or failed.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl<S: Serialize> WorkflowRunState<S> {
    /// Serialize the user state for storage.
    pub fn encode(&self) -> Result<WorkflowRecord> {
        let user_state = self
            .user_state
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        Ok(WorkflowRecord {
            workflow_id: self.workflow_id.clone(),
            status: self.status,
            current_step: self.current_step.clone(),
            step_input: self.step_input.clone(),
            user_state,
            attempt: self.attempt,
            retry_count: self.retry_count,
            recovering: self.recovering,
            failure: self.failure.clone(),
            started_at: self.started_at,
        })
    }
}

impl WorkflowRecord {
    /// Deserialize the user state of a stored record.
    pub fn decode<S: DeserializeOwned>(self) -> Result<WorkflowRunState<S>> {
        let user_state = self
            .user_state
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| WaypointError::Deserialization(e.to_string()))?;

        Ok(WorkflowRunState {
            workflow_id: self.workflow_id,
            status: self.status,
            current_step: self.current_step,
            step_input: self.step_input,
            user_state,
            attempt: self.attempt,
            retry_count: self.retry_count,
            recovering: self.recovering,
            failure: self.failure,
            started_at: self.started_at,
        })
    }
}
