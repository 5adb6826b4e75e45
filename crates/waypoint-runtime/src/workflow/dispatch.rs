use std::sync::Arc;
use std::time::Duration;

use waypoint_core::workflow::{StepExecutor, StepFailure, StepInvocation, StepOutcome};

/// Run one step attempt, bounded by `timeout`.
///
/// Errors and timeouts come back as distinct failure outcomes.
pub(crate) async fn run_step(
    executor: Arc<dyn StepExecutor>,
    invocation: StepInvocation,
    timeout: Duration,
) -> StepOutcome {
    let work = async move {
        match invocation {
            StepInvocation::Deferred(call) => executor.execute(call).await,
            StepInvocation::Async(fut) => fut.await,
        }
    };

    match tokio::time::timeout(timeout, work).await {
        Ok(Ok(value)) => StepOutcome::Success(value),
        Ok(Err(e)) => StepOutcome::Failure(StepFailure::Error(e.to_string())),
        Err(_) => StepOutcome::Failure(StepFailure::Timeout(timeout)),
    }
}
