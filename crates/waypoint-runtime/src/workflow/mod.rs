mod dispatch;
mod instance;
mod interpreter;
mod registry;
mod runtime;

pub use registry::{DeployedWorkflow, WorkflowRegistry};
pub use runtime::WorkflowRuntime;
