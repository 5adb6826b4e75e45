//! Money transfer between two wallets.
//!
//! Withdraws from the source wallet, then deposits into the target wallet.
//! A failed deposit is compensated by paying the amount back. Transfers
//! above [`ACCEPTATION_THRESHOLD`] wait for a manual acceptation, which times
//! out after [`ACCEPTATION_TIMEOUT`].

use std::future::{ready, Ready};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use waypoint::prelude::*;

use crate::wallet::{DepositResult, WithdrawResult, WALLET};

pub const ACCEPTATION_THRESHOLD: i64 = 1000;
pub const ACCEPTATION_TIMEOUT: Duration = Duration::from_secs(8 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub from: String,
    pub to: String,
    pub amount: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Started,
    WaitingForAcceptation,
    TransferAcceptationTimedOut,
    WithdrawFailed,
    WithdrawSucceed,
    DepositFailed,
    Completed,
    CompensationCompleted,
    RequiresManualIntervention,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferState {
    pub transfer_id: String,
    pub transfer: Transfer,
    pub status: TransferStatus,
}

impl TransferState {
    fn with_status(&self, status: TransferStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransferCommand {
    Start { transfer: Transfer },
    Accept,
    AcceptationTimeout,
    Get,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
}

impl Message {
    fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Withdraw {
    from: String,
    amount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Deposit {
    to: String,
    amount: i64,
}

pub struct TransferWorkflow {
    timeout: Option<Duration>,
}

impl TransferWorkflow {
    pub fn new() -> Self {
        Self {
            timeout: Some(Duration::from_secs(5)),
        }
    }

    /// Bound the whole transfer by `timeout`, or not at all.
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl Default for TransferWorkflow {
    fn default() -> Self {
        Self::new()
    }
}

fn acceptation_timer(transfer_id: &str) -> String {
    format!("acceptation-timeout-{}", transfer_id)
}

fn withdraw(ctx: &mut StepContext<'_, TransferState>, cmd: Withdraw) -> Result<DeferredCall> {
    info!(from = %cmd.from, amount = cmd.amount, "Running withdraw");
    // The transfer may have been accepted before its acceptation timer fired.
    let timer = acceptation_timer(ctx.workflow_id());
    ctx.timers().cancel(timer);
    DeferredCall::new(format!("{}/{}", WALLET, cmd.from), "withdraw", &cmd.amount)
}

fn after_withdraw(
    ctx: &mut StepContext<'_, TransferState>,
    result: WithdrawResult,
) -> Result<TransitionalEffect<TransferState>> {
    let state = ctx.current_state()?;
    match result {
        WithdrawResult::WithdrawSucceed => {
            let deposit = Deposit {
                to: state.transfer.to.clone(),
                amount: state.transfer.amount,
            };
            Ok(Effects::update_state(state.with_status(TransferStatus::WithdrawSucceed))
                .transition_to("deposit", deposit))
        }
        WithdrawResult::WithdrawFailed { error_msg } => {
            warn!(transfer_id = %state.transfer_id, error = %error_msg, "Withdraw failed");
            Ok(Effects::update_state(state.with_status(TransferStatus::WithdrawFailed)).end())
        }
    }
}

fn deposit(_ctx: &mut StepContext<'_, TransferState>, cmd: Deposit) -> Result<DeferredCall> {
    info!(to = %cmd.to, amount = cmd.amount, "Running deposit");
    DeferredCall::new(format!("{}/{}", WALLET, cmd.to), "deposit", &cmd.amount)
}

fn after_deposit(
    ctx: &mut StepContext<'_, TransferState>,
    result: DepositResult,
) -> Result<TransitionalEffect<TransferState>> {
    let state = ctx.current_state()?;
    match result {
        DepositResult::DepositSucceed => {
            Ok(Effects::update_state(state.with_status(TransferStatus::Completed)).end())
        }
        DepositResult::DepositFailed { error_msg } => {
            warn!(transfer_id = %state.transfer_id, error = %error_msg, "Deposit failed");
            Ok(Effects::update_state(state.with_status(TransferStatus::DepositFailed))
                .transition_to_step("compensate-withdraw"))
        }
    }
}

fn compensate_withdraw(ctx: &mut StepContext<'_, TransferState>, _: ()) -> Result<DeferredCall> {
    info!("Running withdraw compensation");
    let transfer = &ctx.current_state()?.transfer;
    DeferredCall::new(format!("{}/{}", WALLET, transfer.from), "deposit", &transfer.amount)
}

fn after_compensation(
    ctx: &mut StepContext<'_, TransferState>,
    result: DepositResult,
) -> Result<TransitionalEffect<TransferState>> {
    let state = ctx.current_state()?;
    match result {
        DepositResult::DepositSucceed => Ok(Effects::update_state(
            state.with_status(TransferStatus::CompensationCompleted),
        )
        .end()),
        DepositResult::DepositFailed { error_msg } => Err(WaypointError::StepFailed(format!(
            "Compensation of transfer '{}' failed: {}",
            state.transfer_id, error_msg
        ))),
    }
}

fn schedule_acceptation_timeout(
    ctx: &mut StepContext<'_, TransferState>,
    _: (),
) -> Ready<Result<()>> {
    let timer = acceptation_timer(ctx.workflow_id());
    ready(ctx.timers().start_single_timer(
        timer,
        ACCEPTATION_TIMEOUT,
        &TransferCommand::AcceptationTimeout,
    ))
}

fn handle_failure(_ctx: &mut StepContext<'_, TransferState>, _: ()) -> Ready<Result<String>> {
    info!("Running workflow failed step");
    ready(Ok("handling failure".to_string()))
}

fn after_failure(
    ctx: &mut StepContext<'_, TransferState>,
    _: String,
) -> Result<TransitionalEffect<TransferState>> {
    let state = ctx.current_state()?;
    Ok(Effects::update_state(state.with_status(TransferStatus::RequiresManualIntervention)).end())
}

impl Workflow for TransferWorkflow {
    type State = TransferState;
    type Command = TransferCommand;

    fn info() -> WorkflowInfo {
        WorkflowInfo {
            name: "transfer",
            version: 1,
        }
    }

    fn definition(&self) -> std::result::Result<WorkflowDefinition<TransferState>, BuildError> {
        let withdraw = step("withdraw").call(withdraw).and_then(after_withdraw);
        let deposit = step("deposit").call(deposit).and_then(after_deposit);
        let compensate_withdraw = step("compensate-withdraw")
            .call(compensate_withdraw)
            .and_then(after_compensation);
        let wait_for_acceptation = step("wait-for-acceptation")
            .async_call(schedule_acceptation_timeout)
            .and_then(|_ctx, _: ()| Ok(Effects::pause()));
        let failover_handler = step("failover-handler")
            .async_call(handle_failure)
            .and_then(after_failure)
            .timeout(Duration::from_secs(1));

        let mut builder = workflow()
            .default_step_timeout(Duration::from_secs(2))
            .failover_to("failover-handler", max_retries(0))
            .default_step_recover_strategy(max_retries(1).failover_to("failover-handler"))
            .add_step(withdraw)
            .add_step_with_recovery(deposit, max_retries(2).failover_to("compensate-withdraw"))
            .add_step(compensate_withdraw)
            .add_step(wait_for_acceptation)
            .add_step(failover_handler);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        builder.build()
    }

    fn handle_command(
        &self,
        ctx: &mut CommandContext<'_, TransferState>,
        command: TransferCommand,
    ) -> Result<Effect<TransferState>> {
        match command {
            TransferCommand::Start { transfer } => {
                if ctx.state().is_some() {
                    return Ok(Effects::error("transfer already started"));
                }
                if transfer.amount <= 0 {
                    return Ok(Effects::error("transfer amount should be greater than zero"));
                }

                let state = TransferState {
                    transfer_id: ctx.workflow_id().to_string(),
                    transfer: transfer.clone(),
                    status: TransferStatus::Started,
                };
                if transfer.amount > ACCEPTATION_THRESHOLD {
                    info!(transfer_id = %state.transfer_id, "Waiting for acceptation");
                    return Ok(Effects::update_state(
                        state.with_status(TransferStatus::WaitingForAcceptation),
                    )
                    .transition_to_step("wait-for-acceptation")
                    .then_reply(Message::new("transfer started, waiting for acceptation")));
                }

                let withdraw = Withdraw {
                    from: transfer.from,
                    amount: transfer.amount,
                };
                Ok(Effects::update_state(state)
                    .transition_to("withdraw", withdraw)
                    .then_reply(Message::new("transfer started")))
            }
            TransferCommand::AcceptationTimeout => match ctx.state() {
                None => Ok(Effects::error("transfer not started")),
                Some(state) if state.status == TransferStatus::WaitingForAcceptation => {
                    Ok(Effects::update_state(
                        state.with_status(TransferStatus::TransferAcceptationTimedOut),
                    )
                    .end()
                    .then_reply("timed out"))
                }
                Some(state) => {
                    info!(status = ?state.status, "Ignoring acceptation timeout");
                    Ok(Effects::reply("Ok"))
                }
            },
            TransferCommand::Accept => match ctx.state() {
                None => Ok(Effects::error("transfer not started")),
                Some(state) if state.status == TransferStatus::WaitingForAcceptation => {
                    let withdraw = Withdraw {
                        from: state.transfer.from.clone(),
                        amount: state.transfer.amount,
                    };
                    Ok(Effects::transition_to("withdraw", withdraw)
                        .then_reply(Message::new("transfer accepted")))
                }
                Some(state) => Ok(Effects::error(format!(
                    "Cannot accept transfer with status: {:?}",
                    state.status
                ))),
            },
            TransferCommand::Get => match ctx.state() {
                None => Ok(Effects::error("transfer not started")),
                Some(state) => Ok(Effects::reply(state.clone())),
            },
        }
    }
}
