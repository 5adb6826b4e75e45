//! Testing utilities for waypoint workflows.
//!
//! Enabled with the `testing` feature.
//!
//! ```ignore
//! let executor = MockStepExecutor::new();
//! executor.respond("wallet/a", "withdraw", json!({"type": "Succeeded"}));
//! executor.fail("wallet/b", "deposit", "wallet unavailable");
//!
//! // ... run the workflow ...
//!
//! executor.assert_called("wallet/a", "withdraw");
//! executor.assert_call_count("wallet/b", "deposit", 3);
//! ```

pub mod assertions;
pub mod mock_executor;

pub use mock_executor::{MockStepExecutor, RecordedCall};

use std::time::Duration;

/// Default test timeout.
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(30);
