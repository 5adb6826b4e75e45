use std::time::Duration;

use thiserror::Error;

use crate::workflow::BuildError;

/// Core error type for waypoint operations.
#[derive(Error, Debug)]
pub enum WaypointError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Invalid workflow definition: {0}")]
    Build(#[from] BuildError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Step failed: {0}")]
    StepFailed(String),

    /// A step or transition broke its contract (unknown step, unexpected
    /// result type, unencodable value). Never retried.
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("Workflow failed: {0}")]
    WorkflowFailed(String),

    #[error("Workflow instance stopped: {0}")]
    InstanceStopped(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WaypointError {
    /// Whether this error is a programming error that must not be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ContractViolation(_))
    }
}

impl From<serde_json::Error> for WaypointError {
    fn from(e: serde_json::Error) -> Self {
        WaypointError::Serialization(e.to_string())
    }
}

/// Result type alias using WaypointError.
pub type Result<T> = std::result::Result<T, WaypointError>;
