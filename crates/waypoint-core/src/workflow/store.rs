use async_trait::async_trait;

use super::state::WorkflowRecord;
use crate::Result;

/// Persistence boundary for workflow run state.
///
/// The runtime saves a record before it replies or dispatches anything that
/// depends on it; a save that returns `Ok` must be durable.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    /// Load the record of `workflow_id`, if one was saved.
    async fn load(&self, workflow: &str, workflow_id: &str) -> Result<Option<WorkflowRecord>>;

    /// Insert or replace the record.
    async fn save(&self, workflow: &str, record: &WorkflowRecord) -> Result<()>;
}
