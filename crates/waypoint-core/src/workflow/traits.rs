use std::fmt::Debug;

use serde::{de::DeserializeOwned, Serialize};

use super::context::CommandContext;
use super::definition::{BuildError, WorkflowDefinition};
use super::effect::Effect;
use crate::Result;

/// A workflow type: its steps plus the commands it accepts.
pub trait Workflow: Send + Sync + 'static {
    /// The workflow's own state.
    type State: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static;
    /// Commands accepted by the workflow, including those delivered by timers.
    type Command: Serialize + DeserializeOwned + Debug + Send + 'static;

    /// Get workflow metadata.
    fn info() -> WorkflowInfo;

    /// Steps, timeouts and recovery policy. Built once when the workflow is deployed.
    fn definition(&self) -> std::result::Result<WorkflowDefinition<Self::State>, BuildError>;

    /// State of an instance that has not handled any command yet.
    fn empty_state(&self) -> Option<Self::State> {
        None
    }

    /// Handle an external (or timer-delivered) command.
    ///
    /// `Err` values become error replies, except contract violations which
    /// stop the instance.
    fn handle_command(
        &self,
        ctx: &mut CommandContext<'_, Self::State>,
        command: Self::Command,
    ) -> Result<Effect<Self::State>>;
}

/// Workflow metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowInfo {
    /// Workflow name.
    pub name: &'static str,
    /// Workflow version.
    pub version: u32,
}

impl Default for WorkflowInfo {
    fn default() -> Self {
        Self {
            name: "",
            version: 1,
        }
    }
}
