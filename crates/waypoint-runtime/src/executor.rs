//! In-process step executor.
//!
//! Deferred calls address `component` as `<type>/<id>` (e.g. `wallet/a`).
//! Handlers are registered per component type and method and receive the
//! component id plus the payload.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Serialize};

use waypoint_core::workflow::{DeferredCall, StepExecutor};
use waypoint_core::{Result, WaypointError};

/// Type alias for boxed call handler.
pub type BoxedCallHandler =
    Arc<dyn Fn(String, serde_json::Value) -> BoxFuture<'static, Result<serde_json::Value>> + Send + Sync>;

/// Routes deferred calls to registered async handlers.
#[derive(Default, Clone)]
pub struct InProcessExecutor {
    handlers: HashMap<(String, String), BoxedCallHandler>,
}

impl InProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler working on raw JSON.
    pub fn register_raw<F, Fut>(&mut self, component_type: &str, method: &str, handler: F)
    where
        F: Fn(String, serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        self.handlers.insert(
            (component_type.to_string(), method.to_string()),
            Arc::new(
                move |id: String,
                      payload: serde_json::Value|
                      -> BoxFuture<'static, Result<serde_json::Value>> {
                    Box::pin(handler(id, payload))
                },
            ),
        );
    }

    /// Register a typed handler.
    pub fn register<Req, Res, F, Fut>(&mut self, component_type: &str, method: &str, handler: F)
    where
        Req: DeserializeOwned + Send + 'static,
        Res: Serialize + Send + 'static,
        F: Fn(String, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let method_name = format!("{}.{}", component_type, method);
        self.register_raw(component_type, method, move |id, payload| {
            let handler = handler.clone();
            let method_name = method_name.clone();
            async move {
                let request: Req = serde_json::from_value(payload).map_err(|e| {
                    WaypointError::Validation(format!("Invalid request for '{}': {}", method_name, e))
                })?;
                let response = handler(id, request).await?;
                Ok(serde_json::to_value(response)?)
            }
        });
    }

    /// Whether a handler exists for `component_type.method`.
    pub fn handles(&self, component_type: &str, method: &str) -> bool {
        self.handlers
            .contains_key(&(component_type.to_string(), method.to_string()))
    }

    /// Get the number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

fn split_component(component: &str) -> (&str, &str) {
    component.split_once('/').unwrap_or((component, ""))
}

#[async_trait]
impl StepExecutor for InProcessExecutor {
    async fn execute(&self, call: DeferredCall) -> Result<serde_json::Value> {
        let (component_type, id) = split_component(&call.component);
        let handler = self
            .handlers
            .get(&(component_type.to_string(), call.method.clone()))
            .ok_or_else(|| {
                WaypointError::NotFound(format!(
                    "No handler for '{}.{}'",
                    component_type, call.method
                ))
            })?
            .clone();

        handler(id.to_string(), call.payload).await
    }
}
