pub mod executor;
pub mod observability;
pub mod store;
pub mod timer;
pub mod workflow;

pub use executor::InProcessExecutor;
pub use observability::init_tracing;
pub use store::{InMemoryStateStore, PgStateStore};
pub use timer::TokioTimerFacility;
pub use workflow::{DeployedWorkflow, WorkflowRegistry, WorkflowRuntime};
