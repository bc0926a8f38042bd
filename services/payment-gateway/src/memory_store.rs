use crate::errors::{GatewayError, Result};
use crate::models::{Account, Invoice};
use crate::store::{Store, StoreTransaction};
use async_trait::async_trait;
use std::collections::HashMap;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<Uuid, Account>,
    invoices: HashMap<Uuid, Invoice>,
}

/// A thread-safe in-memory store for local runs and tests.
///
/// A store transaction holds the state mutex until it commits or is dropped,
/// which serializes every unit of work the same way row locks serialize
/// writers to a single account in Postgres.
#[derive(Default, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    #[cfg(test)]
    fail_balance_writes: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn fail_balance_writes(&self, fail: bool) {
        self.fail_balance_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_account(&self, account: &Account) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.accounts.values().any(|a| a.api_key == account.api_key) {
            return Err(GatewayError::DuplicateApiKey);
        }
        state.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn get_account(&self, account_id: Uuid) -> Result<Account> {
        let state = self.state.lock().await;
        state
            .accounts
            .get(&account_id)
            .cloned()
            .ok_or(GatewayError::AccountNotFound)
    }

    async fn get_account_by_api_key(&self, api_key: &str) -> Result<Account> {
        let state = self.state.lock().await;
        state
            .accounts
            .values()
            .find(|a| a.api_key == api_key)
            .cloned()
            .ok_or(GatewayError::AccountNotFound)
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Invoice> {
        let state = self.state.lock().await;
        state
            .invoices
            .get(&invoice_id)
            .cloned()
            .ok_or(GatewayError::InvoiceNotFound(invoice_id))
    }

    async fn list_invoices_by_account(&self, account_id: Uuid) -> Result<Vec<Invoice>> {
        let state = self.state.lock().await;
        let mut invoices: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|i| i.account_id == account_id)
            .cloned()
            .collect();
        invoices.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(invoices)
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let state = self.state.clone().lock_owned().await;
        Ok(Box::new(MemoryTransaction {
            state: Some(state),
            accounts: HashMap::new(),
            invoices: HashMap::new(),
            #[cfg(test)]
            fail_balance_writes: self.fail_balance_writes.load(Ordering::SeqCst),
        }))
    }
}

/// Writes are staged and only become visible on commit, which also releases
/// the state mutex.
pub struct MemoryTransaction {
    state: Option<OwnedMutexGuard<MemoryState>>,
    accounts: HashMap<Uuid, Account>,
    invoices: HashMap<Uuid, Invoice>,
    #[cfg(test)]
    fail_balance_writes: bool,
}

impl MemoryTransaction {
    fn state(&self) -> Result<&MemoryState> {
        self.state
            .as_deref()
            .ok_or_else(|| GatewayError::Internal("Transaction already committed".to_string()))
    }

    fn find_invoice(&self, invoice_id: Uuid) -> Result<Option<&Invoice>> {
        let state = self.state()?;
        Ok(self
            .invoices
            .get(&invoice_id)
            .or_else(|| state.invoices.get(&invoice_id)))
    }

    #[cfg(test)]
    fn injected_write_failure(&self) -> Result<()> {
        if self.fail_balance_writes {
            return Err(GatewayError::Persistence(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn injected_write_failure(&self) -> Result<()> {
        Ok(())
    }

    fn find_account(&self, account_id: Uuid) -> Result<Option<&Account>> {
        let state = self.state()?;
        Ok(self
            .accounts
            .get(&account_id)
            .or_else(|| state.accounts.get(&account_id)))
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<()> {
        if self.find_account(invoice.account_id)?.is_none() {
            return Err(GatewayError::AccountNotFound);
        }
        if self.find_invoice(invoice.id)?.is_some() {
            return Err(GatewayError::Internal(format!(
                "Invoice {} already exists",
                invoice.id
            )));
        }
        self.invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn lock_invoice(&mut self, invoice_id: Uuid) -> Result<Invoice> {
        self.find_invoice(invoice_id)?
            .cloned()
            .ok_or(GatewayError::InvoiceNotFound(invoice_id))
    }

    async fn update_invoice_status(&mut self, invoice: &Invoice) -> Result<()> {
        let mut stored = self
            .find_invoice(invoice.id)?
            .cloned()
            .ok_or(GatewayError::InvoiceNotFound(invoice.id))?;
        stored.status = invoice.status;
        stored.updated_at = invoice.updated_at;
        self.invoices.insert(stored.id, stored);
        Ok(())
    }

    async fn lock_account(&mut self, account_id: Uuid) -> Result<Account> {
        self.find_account(account_id)?
            .cloned()
            .ok_or(GatewayError::AccountNotFound)
    }

    async fn write_balance(&mut self, account: &Account) -> Result<()> {
        self.injected_write_failure()?;
        let mut stored = self
            .find_account(account.id)?
            .cloned()
            .ok_or(GatewayError::AccountNotFound)?;
        stored.balance = account.balance;
        stored.updated_at = account.updated_at;
        self.accounts.insert(stored.id, stored);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let mut state = self
            .state
            .take()
            .ok_or_else(|| GatewayError::Internal("Transaction already committed".to_string()))?;
        state.accounts.extend(self.accounts.drain());
        state.invoices.extend(self.invoices.drain());
        Ok(())
    }
}
