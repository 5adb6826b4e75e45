use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::effect::Metadata;
use crate::Result;

/// Description of a remote invocation, executed later by a [`StepExecutor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredCall {
    /// Target component (e.g. `wallet/a`).
    pub component: String,
    /// Method on that component.
    pub method: String,
    /// Serialized request.
    pub payload: serde_json::Value,
    /// Call metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

impl DeferredCall {
    /// Describe a call to `component.method` with `payload`.
    pub fn new<P: Serialize>(
        component: impl Into<String>,
        method: impl Into<String>,
        payload: &P,
    ) -> Result<Self> {
        Ok(Self {
            component: component.into(),
            method: method.into(),
            payload: serde_json::to_value(payload)?,
            metadata: Metadata::new(),
        })
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Executes deferred calls on behalf of workflow steps.
///
/// Implementations perform the actual I/O. Failures come back as `Err`;
/// timeouts are enforced by the caller.
#[async_trait]
pub trait StepExecutor: Send + Sync + 'static {
    /// Run the call and return its serialized result.
    async fn execute(&self, call: DeferredCall) -> Result<serde_json::Value>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deferred_call() {
        let call = DeferredCall::new("wallet/a", "withdraw", &10)
            .unwrap()
            .with_metadata(Metadata::new().with("idempotency-key", "t1"));
        assert_eq!(call.component, "wallet/a");
        assert_eq!(call.method, "withdraw");
        assert_eq!(call.payload, serde_json::json!(10));
        assert_eq!(call.metadata.get("idempotency-key"), Some("t1"));
    }
}
