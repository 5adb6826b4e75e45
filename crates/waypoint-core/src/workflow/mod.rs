mod call;
mod context;
mod definition;
mod effect;
mod event;
mod machine;
mod recovery;
mod state;
mod step;
mod store;
mod timer;
mod traits;

pub use call::{DeferredCall, StepExecutor};
pub use context::{CommandContext, StepContext};
pub use definition::{workflow, BuildError, WorkflowDefinition, WorkflowDefinitionBuilder};
pub use effect::{
    Effect, Effects, ErrorCode, Metadata, PersistenceEffectBuilder, Reply, Transition,
    TransitionalEffect,
};
pub use event::{StepCompletion, TimerFired, WorkflowEvent};
pub use machine::{Decision, StepDispatch, WorkflowMachine};
pub use recovery::{max_retries, resolve, MaxRetries, RecoverStrategy, WorkflowFailover};
pub use state::{WorkflowRecord, WorkflowRunState, WorkflowStatus};
pub use step::{
    step, PendingStep, Step, StepBuilder, StepFailure, StepInvocation, StepKind, StepOutcome,
};
pub use store::StateStore;
pub use timer::{
    TimerCallback, TimerFacility, TimerKey, TimerPayload, TimerRequest, Timers,
    WORKFLOW_TIMEOUT_TIMER,
};
pub use traits::{Workflow, WorkflowInfo};

/// Generate a fresh workflow instance id.
pub fn new_workflow_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
