pub mod config;
pub mod error;
pub mod workflow;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::WaypointConfig;
pub use error::{Result, WaypointError};
pub use workflow::{
    step, workflow, BuildError, CommandContext, DeferredCall, Effect, Effects, StepContext,
    StepExecutor, Workflow, WorkflowDefinition, WorkflowInfo, WorkflowStatus,
};
