use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Invoice status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "invoice_status", rename_all = "lowercase")]
pub enum InvoiceStatus {
    Pending,
    Approved,
    Rejected,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Approved => "approved",
            InvoiceStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvoiceStatus::Pending)
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Merchant account. The balance is only written by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub api_key: String,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(name: &str, email: &str) -> Self {
        let now = Utc::now();
        Account {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
            api_key: generate_api_key(),
            balance: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }
}

fn generate_api_key() -> String {
    Uuid::new_v4().simple().to_string()
}

/// A single requested transaction against an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub account_id: Uuid,
    pub amount: Decimal,
    pub status: InvoiceStatus,
    pub description: String,
    pub payment_type: String,
    pub card_last_digits: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Keeps the last four digits of a card number, ignoring separators.
pub fn card_last_digits(card_number: &str) -> String {
    let digits: Vec<char> = card_number.chars().filter(|c| c.is_ascii_digit()).collect();
    let start = digits.len().saturating_sub(4);
    digits[start..].iter().collect()
}

/// Fraud evaluation request published for invoices that need external review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTransactionEvent {
    pub account_id: Uuid,
    pub invoice_id: Uuid,
    pub amount: Decimal,
}

impl PendingTransactionEvent {
    pub fn for_invoice(invoice: &Invoice) -> Self {
        PendingTransactionEvent {
            account_id: invoice.account_id,
            invoice_id: invoice.id,
            amount: invoice.amount,
        }
    }
}

/// Fraud evaluation outcome consumed from the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionResultEvent {
    pub invoice_id: Uuid,
    pub status: InvoiceStatus,
}

/// Account creation request
#[derive(Debug, Deserialize, Serialize, validator::Validate)]
pub struct CreateAccountRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(email)]
    pub email: String,
}

/// Account response
#[derive(Debug, Serialize, Deserialize)]
pub struct AccountResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub balance: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccountResponse {
    /// Only the creation response reveals the API key.
    pub fn with_api_key(account: Account) -> Self {
        let api_key = Some(account.api_key.clone());
        AccountResponse { api_key, ..Self::from(account) }
    }
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        AccountResponse {
            id: account.id,
            name: account.name,
            email: account.email,
            balance: account.balance,
            api_key: None,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

/// Invoice creation request
#[derive(Debug, Clone, Deserialize, Serialize, validator::Validate)]
pub struct CreateInvoiceRequest {
    pub amount: Decimal,
    #[validate(length(min = 1, max = 255))]
    pub description: String,
    #[validate(length(min = 1, max = 50))]
    pub payment_type: String,
    #[validate(length(min = 12, max = 23))]
    pub card_number: String,
    #[validate(length(min = 3, max = 4))]
    pub cvv: String,
    #[validate(range(min = 1, max = 12))]
    pub expiry_month: u32,
    #[validate(range(min = 2000, max = 2100))]
    pub expiry_year: i32,
    #[validate(length(min = 1, max = 255))]
    pub cardholder_name: String,
}

/// Invoice response
#[derive(Debug, Serialize, Deserialize)]
pub struct InvoiceResponse {
    pub id: Uuid,
    pub account_id: Uuid,
    pub amount: Decimal,
    pub status: InvoiceStatus,
    pub description: String,
    pub payment_type: String,
    pub card_last_digits: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Invoice> for InvoiceResponse {
    fn from(invoice: Invoice) -> Self {
        InvoiceResponse {
            id: invoice.id,
            account_id: invoice.account_id,
            amount: invoice.amount,
            status: invoice.status,
            description: invoice.description,
            payment_type: invoice.payment_type,
            card_last_digits: invoice.card_last_digits,
            created_at: invoice.created_at,
            updated_at: invoice.updated_at,
        }
    }
}
