//! Test assertion macros.

/// Assert that a result is Ok.
///
/// ```ignore
/// assert_ok!(runtime.handle_command("t1", cmd).await);
/// ```
#[macro_export]
macro_rules! assert_ok {
    ($expr:expr) => {
        match &$expr {
            Ok(_) => (),
            Err(e) => panic!("assertion failed: expected Ok, got Err({:?})", e),
        }
    };
    ($expr:expr, $($arg:tt)+) => {
        match &$expr {
            Ok(_) => (),
            Err(e) => panic!("assertion failed: {}: expected Ok, got Err({:?})", format_args!($($arg)+), e),
        }
    };
}

/// Assert that an error matches a specific variant.
///
/// ```ignore
/// assert_err_variant!(definition, BuildError::DuplicateStep(_));
/// ```
#[macro_export]
macro_rules! assert_err_variant {
    ($expr:expr, $variant:pat) => {
        match &$expr {
            Err($variant) => (),
            Err(e) => panic!(
                "assertion failed: expected {}, got {:?}",
                stringify!($variant),
                e
            ),
            Ok(v) => panic!(
                "assertion failed: expected Err({}), got Ok({:?})",
                stringify!($variant),
                v
            ),
        }
    };
}

/// Assert the status of a workflow run state.
///
/// ```ignore
/// assert_workflow_status!(runtime.state("t1").await?, WorkflowStatus::Finished);
/// ```
#[macro_export]
macro_rules! assert_workflow_status {
    ($state:expr, $status:expr) => {
        match &$state {
            Some(state) => assert_eq!(
                state.status, $status,
                "Workflow '{}' has status {:?}, expected {:?}",
                state.workflow_id, state.status, $status
            ),
            None => panic!("assertion failed: workflow state not found"),
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::workflow::{WorkflowRunState, WorkflowStatus};
    use crate::WaypointError;

    #[test]
    fn test_assert_ok() {
        let result: Result<u32, WaypointError> = Ok(1);
        assert_ok!(result);
    }

    #[test]
    fn test_assert_err_variant() {
        let result: Result<(), WaypointError> = Err(WaypointError::NotFound("t1".into()));
        assert_err_variant!(result, WaypointError::NotFound(_));
    }

    #[test]
    fn test_assert_workflow_status() {
        let state: Option<WorkflowRunState<()>> = Some(WorkflowRunState::new("t1", None));
        assert_workflow_status!(state, WorkflowStatus::Idle);
    }

    #[test]
    #[should_panic]
    fn test_assert_workflow_status_mismatch() {
        let state: Option<WorkflowRunState<()>> = Some(WorkflowRunState::new("t1", None));
        assert_workflow_status!(state, WorkflowStatus::Finished);
    }
}
