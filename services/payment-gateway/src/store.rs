//! Persistence contracts shared by the Postgres database and the in-memory store.

use crate::errors::Result;
use crate::models::{Account, Invoice};
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait Store: Send + Sync {
    async fn create_account(&self, account: &Account) -> Result<()>;

    async fn get_account(&self, account_id: Uuid) -> Result<Account>;

    async fn get_account_by_api_key(&self, api_key: &str) -> Result<Account>;

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Invoice>;

    /// Newest first
    async fn list_invoices_by_account(&self, account_id: Uuid) -> Result<Vec<Invoice>>;

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;
}

/// A unit of work. Rows returned by the `lock_*` methods stay locked until the
/// transaction commits or is dropped; dropping without `commit` rolls back.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<()>;

    async fn lock_invoice(&mut self, invoice_id: Uuid) -> Result<Invoice>;

    async fn update_invoice_status(&mut self, invoice: &Invoice) -> Result<()>;

    async fn lock_account(&mut self, account_id: Uuid) -> Result<Account>;

    async fn write_balance(&mut self, account: &Account) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;
}
