//! Wallets the transfer workflow moves money between.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use waypoint::prelude::InProcessExecutor;

/// Component type wallets are registered under.
pub const WALLET: &str = "wallet";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WithdrawResult {
    WithdrawSucceed,
    WithdrawFailed { error_msg: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DepositResult {
    DepositSucceed,
    DepositFailed { error_msg: String },
}

/// In-memory wallet balances.
#[derive(Debug, Clone, Default)]
pub struct WalletService {
    wallets: Arc<RwLock<HashMap<String, i64>>>,
}

impl WalletService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, wallet_id: &str, balance: i64) {
        self.wallets
            .write()
            .await
            .insert(wallet_id.to_string(), balance);
    }

    pub async fn balance(&self, wallet_id: &str) -> Option<i64> {
        self.wallets.read().await.get(wallet_id).copied()
    }

    pub async fn withdraw(&self, wallet_id: &str, amount: i64) -> WithdrawResult {
        let mut wallets = self.wallets.write().await;
        match wallets.get_mut(wallet_id) {
            None => WithdrawResult::WithdrawFailed {
                error_msg: format!("Wallet '{}' not found", wallet_id),
            },
            Some(balance) if *balance < amount => WithdrawResult::WithdrawFailed {
                error_msg: "Insufficient balance".to_string(),
            },
            Some(balance) => {
                *balance -= amount;
                WithdrawResult::WithdrawSucceed
            }
        }
    }

    pub async fn deposit(&self, wallet_id: &str, amount: i64) -> DepositResult {
        let mut wallets = self.wallets.write().await;
        match wallets.get_mut(wallet_id) {
            None => DepositResult::DepositFailed {
                error_msg: format!("Wallet '{}' not found", wallet_id),
            },
            Some(balance) => {
                *balance += amount;
                DepositResult::DepositSucceed
            }
        }
    }

    /// Expose `wallet/<id>` withdraw and deposit calls to workflows.
    pub fn register(&self, executor: &mut InProcessExecutor) {
        let wallets = self.clone();
        executor.register(WALLET, "withdraw", move |id: String, amount: i64| {
            let wallets = wallets.clone();
            async move { Ok(wallets.withdraw(&id, amount).await) }
        });

        let wallets = self.clone();
        executor.register(WALLET, "deposit", move |id: String, amount: i64| {
            let wallets = wallets.clone();
            async move { Ok(wallets.deposit(&id, amount).await) }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_withdraw_checks_balance() {
        let wallets = WalletService::new();
        wallets.create("a", 50).await;

        assert!(matches!(
            wallets.withdraw("a", 80).await,
            WithdrawResult::WithdrawFailed { .. }
        ));
        assert_eq!(wallets.withdraw("a", 20).await, WithdrawResult::WithdrawSucceed);
        assert_eq!(wallets.balance("a").await, Some(30));
    }

    #[tokio::test]
    async fn test_deposit_to_unknown_wallet_fails() {
        let wallets = WalletService::new();
        assert!(matches!(
            wallets.deposit("nobody", 10).await,
            DepositResult::DepositFailed { .. }
        ));
    }
}
