use crate::errors::{GatewayError, Result};
use crate::models::{Account, Invoice};
use crate::store::{Store, StoreTransaction};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Pool, Postgres, Transaction};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    DO $$ BEGIN
        CREATE TYPE invoice_status AS ENUM ('pending', 'approved', 'rejected');
    EXCEPTION
        WHEN duplicate_object THEN NULL;
    END $$
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        id UUID PRIMARY KEY,
        name VARCHAR(255) NOT NULL,
        email VARCHAR(255) NOT NULL,
        api_key VARCHAR(64) NOT NULL UNIQUE,
        balance NUMERIC(20, 4) NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS invoices (
        id UUID PRIMARY KEY,
        account_id UUID NOT NULL REFERENCES accounts(id),
        amount NUMERIC(20, 4) NOT NULL CHECK (amount > 0),
        status invoice_status NOT NULL,
        description VARCHAR(255) NOT NULL,
        payment_type VARCHAR(50) NOT NULL,
        card_last_digits VARCHAR(4) NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_invoices_account_created ON invoices (account_id, created_at DESC)",
];

pub struct Database {
    pool: Pool<Postgres>,
}

impl Database {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        Ok(Database { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the gateway tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        info!("Database schema ready");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn map_unique_violation(err: sqlx::Error) -> GatewayError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
            GatewayError::DuplicateApiKey
        }
        _ => GatewayError::Persistence(err),
    }
}

#[async_trait]
impl Store for Database {
    async fn create_account(&self, account: &Account) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, name, email, api_key, balance, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(account.id)
        .bind(&account.name)
        .bind(&account.email)
        .bind(&account.api_key)
        .bind(account.balance)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_unique_violation)?;

        Ok(())
    }

    async fn get_account(&self, account_id: Uuid) -> Result<Account> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(GatewayError::AccountNotFound)
    }

    async fn get_account_by_api_key(&self, api_key: &str) -> Result<Account> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE api_key = $1")
            .bind(api_key)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(GatewayError::AccountNotFound)
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Invoice> {
        sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = $1")
            .bind(invoice_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(GatewayError::InvoiceNotFound(invoice_id))
    }

    async fn list_invoices_by_account(&self, account_id: Uuid) -> Result<Vec<Invoice>> {
        let invoices = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT * FROM invoices
            WHERE account_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(invoices)
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTransaction { tx: Some(tx) }))
    }
}

/// Postgres unit of work. Dropping it without `commit` rolls back.
pub struct PgStoreTransaction {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgStoreTransaction {
    fn conn(&mut self) -> Result<&mut Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| GatewayError::Internal("Transaction already committed".to_string()))
    }
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<()> {
        let tx = self.conn()?;
        sqlx::query(
            r#"
            INSERT INTO invoices (
                id, account_id, amount, status, description, payment_type,
                card_last_digits, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(invoice.id)
        .bind(invoice.account_id)
        .bind(invoice.amount)
        .bind(invoice.status)
        .bind(&invoice.description)
        .bind(&invoice.payment_type)
        .bind(&invoice.card_last_digits)
        .bind(invoice.created_at)
        .bind(invoice.updated_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn lock_invoice(&mut self, invoice_id: Uuid) -> Result<Invoice> {
        let tx = self.conn()?;
        sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = $1 FOR UPDATE")
            .bind(invoice_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(GatewayError::InvoiceNotFound(invoice_id))
    }

    async fn update_invoice_status(&mut self, invoice: &Invoice) -> Result<()> {
        let tx = self.conn()?;
        let result = sqlx::query("UPDATE invoices SET status = $1, updated_at = $2 WHERE id = $3")
            .bind(invoice.status)
            .bind(invoice.updated_at)
            .bind(invoice.id)
            .execute(&mut **tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(GatewayError::InvoiceNotFound(invoice.id));
        }
        Ok(())
    }

    async fn lock_account(&mut self, account_id: Uuid) -> Result<Account> {
        let tx = self.conn()?;
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1 FOR UPDATE")
            .bind(account_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(GatewayError::AccountNotFound)
    }

    async fn write_balance(&mut self, account: &Account) -> Result<()> {
        let tx = self.conn()?;
        let result = sqlx::query("UPDATE accounts SET balance = $1, updated_at = $2 WHERE id = $3")
            .bind(account.balance)
            .bind(account.updated_at)
            .bind(account.id)
            .execute(&mut **tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(GatewayError::AccountNotFound);
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| GatewayError::Internal("Transaction already committed".to_string()))?;
        tx.commit().await?;
        Ok(())
    }
}
