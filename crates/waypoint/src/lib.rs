//! waypoint - durable step workflows for Rust
//!
//! Workflows are declared as named steps with recovery policies and driven
//! by commands. Every instance runs as its own actor; its state is persisted
//! before any step it decides to run is dispatched.

mod runtime;

#[doc(hidden)]
pub use waypoint_core;
pub use waypoint_runtime;

// Re-export testing assertion macros at crate root when testing feature is enabled.
#[cfg(feature = "testing")]
pub use waypoint_core::{assert_err_variant, assert_ok, assert_workflow_status};

pub use runtime::prelude;
pub use runtime::{Waypoint, WaypointBuilder};
