//! Scripted step executor that records every call.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Result, WaypointError};
use crate::workflow::{DeferredCall, StepExecutor};

/// Record of an executed call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub call: DeferredCall,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
enum Script {
    Respond(serde_json::Value),
    Fail(String),
}

/// Step executor for tests.
///
/// Responses are scripted per `(component, method)`. Scripts queued with
/// [`respond_once`](Self::respond_once) / [`fail_once`](Self::fail_once) are
/// consumed first, then the standing script applies. Calls without a script
/// fail.
pub struct MockStepExecutor {
    standing: RwLock<HashMap<(String, String), Script>>,
    queued: RwLock<HashMap<(String, String), Vec<Script>>>,
    calls: RwLock<Vec<RecordedCall>>,
}

impl MockStepExecutor {
    /// Create a new mock executor.
    pub fn new() -> Self {
        Self {
            standing: RwLock::new(HashMap::new()),
            queued: RwLock::new(HashMap::new()),
            calls: RwLock::new(Vec::new()),
        }
    }

    fn key(component: &str, method: &str) -> (String, String) {
        (component.to_string(), method.to_string())
    }

    /// Always answer `component.method` with `response`.
    pub fn respond(&self, component: &str, method: &str, response: serde_json::Value) {
        self.standing
            .write()
            .unwrap()
            .insert(Self::key(component, method), Script::Respond(response));
    }

    /// Always fail `component.method`.
    pub fn fail(&self, component: &str, method: &str, error: &str) {
        self.standing
            .write()
            .unwrap()
            .insert(Self::key(component, method), Script::Fail(error.to_string()));
    }

    /// Answer the next call of `component.method` with `response`.
    pub fn respond_once(&self, component: &str, method: &str, response: serde_json::Value) {
        self.queued
            .write()
            .unwrap()
            .entry(Self::key(component, method))
            .or_default()
            .push(Script::Respond(response));
    }

    /// Fail the next call of `component.method`.
    pub fn fail_once(&self, component: &str, method: &str, error: &str) {
        self.queued
            .write()
            .unwrap()
            .entry(Self::key(component, method))
            .or_default()
            .push(Script::Fail(error.to_string()));
    }

    /// Get all executed calls.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.read().unwrap().clone()
    }

    /// Number of calls of `component.method`.
    pub fn call_count(&self, component: &str, method: &str) -> usize {
        self.calls
            .read()
            .unwrap()
            .iter()
            .filter(|c| c.call.component == component && c.call.method == method)
            .count()
    }

    /// Assert that `component.method` was called.
    pub fn assert_called(&self, component: &str, method: &str) {
        let calls = self.calls.read().unwrap();
        let found = calls
            .iter()
            .any(|c| c.call.component == component && c.call.method == method);
        assert!(
            found,
            "Expected '{}.{}' to be called, but it wasn't. Calls: {:?}",
            component,
            method,
            calls
                .iter()
                .map(|c| format!("{}.{}", c.call.component, c.call.method))
                .collect::<Vec<_>>()
        );
    }

    /// Assert that `component.method` was never called.
    pub fn assert_not_called(&self, component: &str, method: &str) {
        assert_eq!(
            self.call_count(component, method),
            0,
            "Expected '{}.{}' NOT to be called, but it was",
            component,
            method
        );
    }

    /// Assert the number of calls of `component.method`.
    pub fn assert_call_count(&self, component: &str, method: &str, expected: usize) {
        let count = self.call_count(component, method);
        assert_eq!(
            count, expected,
            "Expected {} calls of '{}.{}', but found {}",
            expected, component, method, count
        );
    }

    /// Clear recorded calls and scripts.
    pub fn clear(&self) {
        self.calls.write().unwrap().clear();
        self.standing.write().unwrap().clear();
        self.queued.write().unwrap().clear();
    }

    fn next_script(&self, component: &str, method: &str) -> Option<Script> {
        let key = Self::key(component, method);
        let mut queued = self.queued.write().unwrap();
        if let Some(scripts) = queued.get_mut(&key) {
            if !scripts.is_empty() {
                return Some(scripts.remove(0));
            }
        }
        self.standing.read().unwrap().get(&key).cloned()
    }
}

impl Default for MockStepExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepExecutor for MockStepExecutor {
    async fn execute(&self, call: DeferredCall) -> Result<serde_json::Value> {
        let script = self.next_script(&call.component, &call.method);
        let missing = format!("No scripted response for '{}.{}'", call.component, call.method);

        self.calls.write().unwrap().push(RecordedCall {
            call,
            executed_at: Utc::now(),
        });

        match script {
            Some(Script::Respond(value)) => Ok(value),
            Some(Script::Fail(error)) => Err(WaypointError::StepFailed(error)),
            None => Err(WaypointError::NotFound(missing)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_scripted_responses() {
        let executor = MockStepExecutor::new();
        executor.respond("wallet/a", "withdraw", json!("ok"));
        executor.fail_once("wallet/a", "withdraw", "busy");

        let call = DeferredCall::new("wallet/a", "withdraw", &10).unwrap();
        assert!(executor.execute(call.clone()).await.is_err());
        assert_eq!(executor.execute(call).await.unwrap(), json!("ok"));
        executor.assert_call_count("wallet/a", "withdraw", 2);
    }

    #[tokio::test]
    async fn test_unscripted_call_fails() {
        let executor = MockStepExecutor::new();
        let call = DeferredCall::new("wallet/b", "deposit", &10).unwrap();
        let result = executor.execute(call).await;
        assert!(matches!(result, Err(WaypointError::NotFound(_))));
        executor.assert_called("wallet/b", "deposit");
        executor.assert_not_called("wallet/a", "withdraw");
    }
}
