use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use waypoint_core::workflow::{Reply, Workflow, WorkflowInfo, WorkflowRecord};
use waypoint_core::{Result, WaypointError};

use super::runtime::WorkflowRuntime;

/// A deployed workflow addressed by name, with commands in JSON.
#[async_trait]
pub trait DeployedWorkflow: Send + Sync {
    fn info(&self) -> WorkflowInfo;

    /// Decode `command` and send it to instance `workflow_id`.
    async fn handle_command(&self, workflow_id: &str, command: serde_json::Value) -> Result<Reply>;

    async fn record(&self, workflow_id: &str) -> Result<Option<WorkflowRecord>>;

    async fn wake(&self, workflow_id: &str) -> Result<()>;

    async fn shutdown(&self);
}

#[async_trait]
impl<W: Workflow> DeployedWorkflow for WorkflowRuntime<W> {
    fn info(&self) -> WorkflowInfo {
        W::info()
    }

    async fn handle_command(&self, workflow_id: &str, command: serde_json::Value) -> Result<Reply> {
        let command: W::Command = serde_json::from_value(command).map_err(|e| {
            WaypointError::Validation(format!(
                "Invalid command for workflow '{}': {}",
                W::info().name,
                e
            ))
        })?;
        WorkflowRuntime::handle_command(self, workflow_id, command).await
    }

    async fn record(&self, workflow_id: &str) -> Result<Option<WorkflowRecord>> {
        WorkflowRuntime::record(self, workflow_id).await
    }

    async fn wake(&self, workflow_id: &str) -> Result<()> {
        WorkflowRuntime::wake(self, workflow_id).await
    }

    async fn shutdown(&self) {
        WorkflowRuntime::shutdown(self).await
    }
}

/// Registry of all deployed workflows.
#[derive(Default, Clone)]
pub struct WorkflowRegistry {
    workflows: HashMap<String, Arc<dyn DeployedWorkflow>>,
}

impl WorkflowRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a deployed workflow. Names must be unique.
    pub fn register<W: Workflow>(&mut self, runtime: WorkflowRuntime<W>) -> Result<()> {
        let name = W::info().name;
        if self.workflows.contains_key(name) {
            return Err(WaypointError::Config(format!(
                "Workflow '{}' is already deployed",
                name
            )));
        }
        self.workflows.insert(name.to_string(), Arc::new(runtime));
        Ok(())
    }

    /// Get a deployed workflow by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn DeployedWorkflow>> {
        self.workflows.get(name).cloned()
    }

    /// Get all workflow names.
    pub fn names(&self) -> Vec<&str> {
        self.workflows.keys().map(|s| s.as_str()).collect()
    }

    /// Get the number of deployed workflows.
    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    /// Send a JSON command to an instance of workflow `name`.
    pub async fn handle_command(
        &self,
        name: &str,
        workflow_id: &str,
        command: serde_json::Value,
    ) -> Result<Reply> {
        self.lookup(name)?.handle_command(workflow_id, command).await
    }

    /// Last persisted record of an instance of workflow `name`.
    pub async fn record(&self, name: &str, workflow_id: &str) -> Result<Option<WorkflowRecord>> {
        self.lookup(name)?.record(workflow_id).await
    }

    /// Stop the instances of every deployed workflow.
    pub async fn shutdown_all(&self) {
        for workflow in self.workflows.values() {
            workflow.shutdown().await;
        }
    }

    fn lookup(&self, name: &str) -> Result<&Arc<dyn DeployedWorkflow>> {
        self.workflows
            .get(name)
            .ok_or_else(|| WaypointError::NotFound(format!("Workflow '{}' is not deployed", name)))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use super::*;
    use crate::store::InMemoryStateStore;
    use crate::timer::TokioTimerFacility;
    use waypoint_core::config::WorkflowConfig;
    use waypoint_core::testing::MockStepExecutor;
    use waypoint_core::workflow::{
        step, workflow, BuildError, CommandContext, DeferredCall, Effect, Effects,
        WorkflowDefinition, WorkflowStatus,
    };

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum Ping {
        Ping { times: u32 },
    }

    struct Pinger;

    impl Workflow for Pinger {
        type State = u32;
        type Command = Ping;

        fn info() -> WorkflowInfo {
            WorkflowInfo {
                name: "pinger",
                version: 1,
            }
        }

        fn definition(&self) -> std::result::Result<WorkflowDefinition<u32>, BuildError> {
            let ping = step("ping")
                .call(|_ctx, times: u32| DeferredCall::new("echo", "ping", &times))
                .and_then(|_ctx, times: u32| Ok(Effects::update_state(times).end()));
            workflow().add_step(ping).build()
        }

        fn handle_command(
            &self,
            _ctx: &mut CommandContext<'_, u32>,
            command: Ping,
        ) -> Result<Effect<u32>> {
            match command {
                Ping::Ping { times } => Ok(Effects::transition_to::<u32, _>("ping", times)
                    .then_reply("pinging")),
            }
        }
    }

    fn runtime() -> WorkflowRuntime<Pinger> {
        let executor = MockStepExecutor::new();
        executor.respond("echo", "ping", json!(3));
        WorkflowRuntime::new(
            Pinger,
            Arc::new(InMemoryStateStore::new()),
            Arc::new(executor),
            Arc::new(TokioTimerFacility::new()),
            WorkflowConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_registry() {
        let registry = WorkflowRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = WorkflowRegistry::new();
        registry.register(runtime()).unwrap();
        let result = registry.register(runtime());

        assert!(matches!(result, Err(WaypointError::Config(_))));
        assert_eq!(registry.names(), vec!["pinger"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_json_command_routed_by_name() {
        let mut registry = WorkflowRegistry::new();
        registry.register(runtime()).unwrap();

        let reply = registry
            .handle_command("pinger", "p1", json!({ "Ping": { "times": 3 } }))
            .await
            .unwrap();
        assert!(!reply.is_error());

        let mut finished = false;
        for _ in 0..100 {
            let record = registry.record("pinger", "p1").await.unwrap();
            if record.is_some_and(|r| r.status == WorkflowStatus::Finished) {
                finished = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(finished);
    }

    #[tokio::test]
    async fn test_invalid_command_is_validation_error() {
        let mut registry = WorkflowRegistry::new();
        registry.register(runtime()).unwrap();

        let result = registry.handle_command("pinger", "p2", json!("Pong")).await;
        assert!(matches!(result, Err(WaypointError::Validation(_))));
    }

    #[tokio::test]
    async fn test_unknown_workflow_not_found() {
        let registry = WorkflowRegistry::new();
        let result = registry.handle_command("missing", "x", json!({})).await;
        assert!(matches!(result, Err(WaypointError::NotFound(_))));
    }
}
