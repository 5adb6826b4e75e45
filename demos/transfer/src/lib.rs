//! Wallet transfer workflow built on waypoint.

pub mod transfer;
pub mod wallet;

use std::sync::Arc;
use std::time::Duration;

use waypoint::prelude::*;

pub use transfer::{
    Message, Transfer, TransferCommand, TransferState, TransferStatus, TransferWorkflow,
};
pub use wallet::WalletService;

/// Deploy the transfer workflow next to `wallets`.
pub async fn deploy(
    config: WaypointConfig,
    wallets: &WalletService,
    workflow: TransferWorkflow,
) -> Result<(Waypoint, WorkflowRuntime<TransferWorkflow>)> {
    let mut executor = InProcessExecutor::new();
    wallets.register(&mut executor);

    let mut waypoint = Waypoint::builder()
        .config(config)
        .executor(Arc::new(executor))
        .build()
        .await?;
    let transfers = waypoint.deploy(workflow)?;
    Ok((waypoint, transfers))
}

/// Poll until the transfer reaches a terminal or paused status.
pub async fn settle(
    transfers: &WorkflowRuntime<TransferWorkflow>,
    transfer_id: &str,
    deadline: Duration,
) -> Result<WorkflowRunState<TransferState>> {
    let poll = Duration::from_millis(10);
    let mut waited = Duration::ZERO;
    loop {
        if let Some(state) = transfers.state(transfer_id).await? {
            if state.status.is_terminal() || state.status == WorkflowStatus::Paused {
                return Ok(state);
            }
        }
        if waited >= deadline {
            return Err(WaypointError::Timeout(deadline));
        }
        tokio::time::sleep(poll).await;
        waited += poll;
    }
}
