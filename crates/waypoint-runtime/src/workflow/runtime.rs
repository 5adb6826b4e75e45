use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use waypoint_core::config::WorkflowConfig;
use waypoint_core::workflow::{
    Reply, StateStore, StepCompletion, StepExecutor, TimerFacility, Workflow, WorkflowDefinition,
    WorkflowMachine, WorkflowRecord, WorkflowRunState,
};
use waypoint_core::{Result, WaypointError};

use super::instance::{Instance, Message};

/// Everything the instances of one workflow share.
pub(crate) struct Shared<W: Workflow> {
    pub(crate) workflow: W,
    pub(crate) definition: WorkflowDefinition<W::State>,
    pub(crate) store: Arc<dyn StateStore>,
    pub(crate) executor: Arc<dyn StepExecutor>,
    pub(crate) timers: Arc<dyn TimerFacility>,
    pub(crate) config: WorkflowConfig,
    pub(crate) shutdown: CancellationToken,
}

impl<W: Workflow> Shared<W> {
    pub(crate) fn machine(&self) -> WorkflowMachine<'_, W> {
        WorkflowMachine::new(
            &self.workflow,
            &self.definition,
            self.config.default_step_timeout(),
        )
    }
}

pub(crate) struct RuntimeInner<W: Workflow> {
    shared: Arc<Shared<W>>,
    instances: Mutex<HashMap<String, mpsc::Sender<Message<W>>>>,
}

impl<W: Workflow> RuntimeInner<W> {
    /// Forget the mailbox of a stopped instance unless a newer actor took
    /// its place.
    pub(crate) async fn release(&self, workflow_id: &str, stale: &mpsc::Sender<Message<W>>) {
        let mut instances = self.instances.lock().await;
        if instances
            .get(workflow_id)
            .is_some_and(|tx| tx.same_channel(stale))
        {
            instances.remove(workflow_id);
        }
    }
}

/// Runs the instances of one deployed workflow.
///
/// Each instance is an actor with its own mailbox, spawned on first use and
/// loaded from the state store. Cloning the runtime is cheap.
pub struct WorkflowRuntime<W: Workflow> {
    inner: Arc<RuntimeInner<W>>,
}

impl<W: Workflow> Clone for WorkflowRuntime<W> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<W: Workflow> WorkflowRuntime<W> {
    /// Build the workflow definition and create the runtime.
    pub fn new(
        workflow: W,
        store: Arc<dyn StateStore>,
        executor: Arc<dyn StepExecutor>,
        timers: Arc<dyn TimerFacility>,
        config: WorkflowConfig,
    ) -> Result<Self> {
        if config.mailbox_capacity == 0 {
            return Err(WaypointError::Config(
                "workflow.mailbox_capacity must be greater than zero".to_string(),
            ));
        }
        let definition = workflow.definition()?;

        info!(
            workflow = W::info().name,
            version = W::info().version,
            steps = definition.steps().len(),
            "Workflow deployed"
        );

        let shared = Shared {
            workflow,
            definition,
            store,
            executor,
            timers,
            config,
            shutdown: CancellationToken::new(),
        };
        Ok(Self {
            inner: Arc::new(RuntimeInner {
                shared: Arc::new(shared),
                instances: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub(crate) fn from_inner(inner: Arc<RuntimeInner<W>>) -> Self {
        Self { inner }
    }

    /// Name of the deployed workflow.
    pub fn name(&self) -> &'static str {
        W::info().name
    }

    pub fn definition(&self) -> &WorkflowDefinition<W::State> {
        &self.inner.shared.definition
    }

    pub fn workflow(&self) -> &W {
        &self.inner.shared.workflow
    }

    /// Send a command to an instance and wait for its reply.
    ///
    /// `Err` means the instance broke its contract or could not be loaded or
    /// saved; ordinary rejections come back as [`Reply::Error`].
    pub async fn handle_command(&self, workflow_id: &str, command: W::Command) -> Result<Reply> {
        let (tx, rx) = oneshot::channel();
        self.deliver(
            workflow_id,
            Message::Command {
                command,
                reply: tx,
            },
        )
        .await?;

        rx.await
            .map_err(|_| WaypointError::InstanceStopped(workflow_id.to_string()))?
    }

    /// Report the result of a step attempt run outside the runtime.
    pub async fn handle_step_result(
        &self,
        workflow_id: &str,
        completion: StepCompletion,
    ) -> Result<()> {
        self.deliver(workflow_id, Message::StepCompleted(completion))
            .await
    }

    /// Load an instance so an interrupted run continues.
    pub async fn wake(&self, workflow_id: &str) -> Result<()> {
        self.deliver(workflow_id, Message::Wake).await
    }

    /// Last persisted state of an instance.
    pub async fn state(&self, workflow_id: &str) -> Result<Option<WorkflowRunState<W::State>>> {
        self.record(workflow_id)
            .await?
            .map(|record| record.decode())
            .transpose()
    }

    /// Last persisted state of an instance, user state left serialized.
    pub async fn record(&self, workflow_id: &str) -> Result<Option<WorkflowRecord>> {
        self.inner.shared.store.load(W::info().name, workflow_id).await
    }

    /// Number of live instance actors. Instances stop once their run has
    /// ended and are spawned again on demand.
    pub async fn instance_count(&self) -> usize {
        let instances = self.inner.instances.lock().await;
        instances.values().filter(|tx| !tx.is_closed()).count()
    }

    /// Stop all instances. Steps in flight are abandoned; their instances
    /// resume them when loaded again.
    pub async fn shutdown(&self) {
        self.inner.shared.shutdown.cancel();
        let mut instances = self.inner.instances.lock().await;
        let count = instances.len();
        instances.clear();
        info!(workflow = W::info().name, instances = count, "Workflow runtime stopped");
    }

    pub(crate) async fn deliver(&self, workflow_id: &str, message: Message<W>) -> Result<()> {
        let sender = self.sender(workflow_id).await?;
        let message = match sender.send(message).await {
            Ok(()) => return Ok(()),
            Err(mpsc::error::SendError(message)) => message,
        };

        // The actor stopped after we looked it up; start a fresh one.
        debug!(
            workflow = W::info().name,
            workflow_id = %workflow_id,
            "Respawning stopped workflow instance"
        );
        self.inner.release(workflow_id, &sender).await;
        let sender = self.sender(workflow_id).await?;
        sender
            .send(message)
            .await
            .map_err(|_| WaypointError::InstanceStopped(workflow_id.to_string()))
    }

    async fn sender(&self, workflow_id: &str) -> Result<mpsc::Sender<Message<W>>> {
        if self.inner.shared.shutdown.is_cancelled() {
            return Err(WaypointError::InstanceStopped(format!(
                "{} (runtime is shut down)",
                workflow_id
            )));
        }

        let mut instances = self.inner.instances.lock().await;
        if let Some(tx) = instances.get(workflow_id) {
            if !tx.is_closed() {
                return Ok(tx.clone());
            }
        }

        let tx = Instance::spawn(
            self.inner.shared.clone(),
            Arc::downgrade(&self.inner),
            workflow_id.to_string(),
        );
        instances.insert(workflow_id.to_string(), tx.clone());
        Ok(tx)
    }

}
