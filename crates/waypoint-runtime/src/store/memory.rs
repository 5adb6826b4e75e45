use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use waypoint_core::workflow::{StateStore, WorkflowRecord};
use waypoint_core::Result;

/// Process-local state store. Records are lost on restart.
#[derive(Default)]
pub struct InMemoryStateStore {
    records: RwLock<HashMap<(String, String), WorkflowRecord>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load(&self, workflow: &str, workflow_id: &str) -> Result<Option<WorkflowRecord>> {
        let records = self.records.read().await;
        Ok(records
            .get(&(workflow.to_string(), workflow_id.to_string()))
            .cloned())
    }

    async fn save(&self, workflow: &str, record: &WorkflowRecord) -> Result<()> {
        self.records.write().await.insert(
            (workflow.to_string(), record.workflow_id.clone()),
            record.clone(),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_core::workflow::{WorkflowRunState, WorkflowStatus};

    #[tokio::test]
    async fn test_save_and_load() {
        let store = InMemoryStateStore::new();
        assert!(store.load("transfer", "t1").await.unwrap().is_none());

        let mut record: WorkflowRecord =
            WorkflowRunState::new("t1", Some(serde_json::json!({"amount": 10})));
        record.status = WorkflowStatus::Running;
        store.save("transfer", &record).await.unwrap();

        let loaded = store.load("transfer", "t1").await.unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(store.load("other", "t1").await.unwrap().is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_save_replaces() {
        let store = InMemoryStateStore::new();
        let mut record: WorkflowRecord = WorkflowRunState::new("t1", None);
        store.save("transfer", &record).await.unwrap();
        record.status = WorkflowStatus::Finished;
        store.save("transfer", &record).await.unwrap();

        let loaded = store.load("transfer", "t1").await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Finished);
        assert_eq!(store.len().await, 1);
    }
}
