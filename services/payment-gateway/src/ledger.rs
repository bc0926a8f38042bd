//! Account balances. Every balance write goes through [`Ledger::credit`], which
//! runs against a row locked inside the caller's store transaction.

use crate::errors::{GatewayError, Result};
use crate::lifecycle::AMOUNT_SCALE;
use crate::metrics;
use crate::models::Account;
use crate::store::{Store, StoreTransaction};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub struct Ledger {
    store: Arc<dyn Store>,
}

impl Ledger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Ledger { store }
    }

    /// Adds `delta` to the account balance in its own transaction.
    pub async fn update_balance(&self, account_id: Uuid, delta: Decimal) -> Result<Account> {
        if delta.normalize().scale() > AMOUNT_SCALE {
            return Err(GatewayError::InvalidAmount(delta));
        }

        let mut tx = self.store.begin().await?;
        let account = Self::credit(tx.as_mut(), account_id, delta).await?;
        tx.commit().await?;

        metrics::BALANCE_UPDATES.inc();
        info!(
            account_id = %account_id,
            delta = %delta,
            balance = %account.balance,
            "Account balance updated"
        );

        Ok(account)
    }

    /// Locked read-modify-write of a balance within an open transaction.
    /// Nothing is visible until the caller commits.
    pub async fn credit(
        tx: &mut dyn StoreTransaction,
        account_id: Uuid,
        delta: Decimal,
    ) -> Result<Account> {
        let mut account = tx.lock_account(account_id).await?;
        account.balance += delta;
        account.updated_at = Utc::now();
        tx.write_balance(&account).await?;

        debug!(account_id = %account_id, delta = %delta, "Balance credit staged");
        Ok(account)
    }

    pub async fn find_by_id(&self, account_id: Uuid) -> Result<Account> {
        self.store.get_account(account_id).await
    }

    pub async fn find_by_api_key(&self, api_key: &str) -> Result<Account> {
        self.store.get_account_by_api_key(api_key).await
    }
}
