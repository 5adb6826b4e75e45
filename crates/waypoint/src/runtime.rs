//! Process-level entry point.
//!
//! Wires the configured state store, the step executor and the timer
//! facility into one place workflows are deployed to.

use std::sync::Arc;

use waypoint_core::config::WaypointConfig;
use waypoint_core::error::{Result, WaypointError};
use waypoint_core::workflow::{StateStore, StepExecutor, TimerFacility, Workflow};
use waypoint_runtime::store;
use waypoint_runtime::timer::TokioTimerFacility;
use waypoint_runtime::workflow::{WorkflowRegistry, WorkflowRuntime};

/// Prelude module for common imports.
pub mod prelude {
    // Common types
    pub use chrono::{DateTime, Utc};

    /// Timestamp type alias for convenience.
    pub type Timestamp = DateTime<Utc>;

    // Core types
    pub use waypoint_core::config::WaypointConfig;
    pub use waypoint_core::error::{Result, WaypointError};
    pub use waypoint_core::workflow::{
        max_retries, new_workflow_id, step, workflow, BuildError, CommandContext, DeferredCall,
        Effect, Effects, ErrorCode, Metadata, RecoverStrategy, Reply, Step, StepContext,
        StepExecutor, TransitionalEffect, Workflow, WorkflowDefinition, WorkflowInfo,
        WorkflowRunState, WorkflowStatus,
    };
    pub use waypoint_runtime::executor::InProcessExecutor;
    pub use waypoint_runtime::workflow::WorkflowRuntime;

    pub use crate::{Waypoint, WaypointBuilder};
}

/// The main waypoint runtime.
pub struct Waypoint {
    config: WaypointConfig,
    store: Arc<dyn StateStore>,
    executor: Arc<dyn StepExecutor>,
    timers: Arc<dyn TimerFacility>,
    workflow_registry: WorkflowRegistry,
}

impl Waypoint {
    /// Create a new builder for configuring waypoint.
    pub fn builder() -> WaypointBuilder {
        WaypointBuilder::new()
    }

    /// Get the configuration.
    pub fn config(&self) -> &WaypointConfig {
        &self.config
    }

    /// Get the state store.
    pub fn store(&self) -> Arc<dyn StateStore> {
        self.store.clone()
    }

    /// Get the workflow registry.
    pub fn workflow_registry(&self) -> &WorkflowRegistry {
        &self.workflow_registry
    }

    /// Deploy a workflow and return its runtime.
    ///
    /// The definition is built and validated here; each workflow name can be
    /// deployed once.
    pub fn deploy<W: Workflow>(&mut self, workflow: W) -> Result<WorkflowRuntime<W>> {
        let runtime = WorkflowRuntime::new(
            workflow,
            self.store.clone(),
            self.executor.clone(),
            self.timers.clone(),
            self.config.workflow.clone(),
        )?;
        self.workflow_registry.register(runtime.clone())?;
        Ok(runtime)
    }

    /// Stop every deployed workflow.
    pub async fn shutdown(&self) {
        self.workflow_registry.shutdown_all().await;
        tracing::info!("waypoint runtime stopped");
    }
}

/// Builder for configuring the waypoint runtime.
pub struct WaypointBuilder {
    config: Option<WaypointConfig>,
    store: Option<Arc<dyn StateStore>>,
    executor: Option<Arc<dyn StepExecutor>>,
    timers: Option<Arc<dyn TimerFacility>>,
}

impl WaypointBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: None,
            store: None,
            executor: None,
            timers: None,
        }
    }

    /// Set the configuration.
    pub fn config(mut self, config: WaypointConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use `store` instead of the one selected by `[store]`.
    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the executor running deferred calls and async steps.
    pub fn executor(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Use `timers` instead of the tokio timer facility.
    pub fn timers(mut self, timers: Arc<dyn TimerFacility>) -> Self {
        self.timers = Some(timers);
        self
    }

    /// Build the waypoint runtime, connecting the state store if needed.
    pub async fn build(self) -> Result<Waypoint> {
        let config = self
            .config
            .ok_or_else(|| WaypointError::Config("Configuration is required".to_string()))?;
        let executor = self
            .executor
            .ok_or_else(|| WaypointError::Config("A step executor is required".to_string()))?;

        let store = match self.store {
            Some(store) => store,
            None => store::from_config(&config.store).await?,
        };
        let timers = self
            .timers
            .unwrap_or_else(|| Arc::new(TokioTimerFacility::new()));

        tracing::info!(
            project = %config.project.name,
            store = ?config.store.backend,
            "waypoint runtime ready"
        );

        Ok(Waypoint {
            config,
            store,
            executor,
            timers,
            workflow_registry: WorkflowRegistry::new(),
        })
    }
}

impl Default for WaypointBuilder {
    fn default() -> Self {
        Self::new()
    }
}
