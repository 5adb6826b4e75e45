use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use console::style;
use tracing::info;

use transfer_demo::{deploy, settle, Transfer, TransferCommand, TransferWorkflow, WalletService};
use waypoint::prelude::*;
use waypoint::waypoint_runtime::init_tracing;

/// Move money between two in-memory wallets with a durable workflow.
#[derive(Parser)]
#[command(name = "transfer-demo")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path.
    #[arg(short, long)]
    config: Option<String>,

    /// Source wallet.
    #[arg(long, default_value = "a")]
    from: String,

    /// Target wallet.
    #[arg(long, default_value = "b")]
    to: String,

    /// Amount to transfer.
    #[arg(long, default_value_t = 10)]
    amount: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => WaypointConfig::from_file(path)?,
        None => WaypointConfig::default(),
    };
    init_tracing(&config.observability.logging)?;

    let wallets = WalletService::new();
    wallets.create("a", 100).await;
    wallets.create("b", 100).await;

    let (waypoint, transfers) = deploy(config, &wallets, TransferWorkflow::new()).await?;

    let transfer_id = new_workflow_id();
    let reply = transfers
        .handle_command(
            &transfer_id,
            TransferCommand::Start {
                transfer: Transfer {
                    from: cli.from.clone(),
                    to: cli.to.clone(),
                    amount: cli.amount,
                },
            },
        )
        .await?;
    info!(transfer_id = %transfer_id, ?reply, "Transfer submitted");

    let state = settle(&transfers, &transfer_id, Duration::from_secs(10)).await?;
    let status = state
        .user_state
        .map(|s| format!("{:?}", s.status))
        .unwrap_or_else(|| "-".to_string());

    println!();
    println!(
        "  {} transfer {} is {} ({})",
        style("waypoint").bold().cyan(),
        transfer_id,
        style(state.status.as_str()).bold(),
        status
    );
    for wallet in [&cli.from, &cli.to] {
        let balance = wallets
            .balance(wallet)
            .await
            .map_or_else(|| "missing".to_string(), |b| b.to_string());
        println!("    wallet {}: {}", wallet, balance);
    }
    println!();

    waypoint.shutdown().await;
    Ok(())
}
