use crate::errors::{GatewayError, Result};
use crate::ledger::Ledger;
use crate::lifecycle::{ClassificationPolicy, Transition};
use crate::metrics;
use crate::models::{
    Account, CreateAccountRequest, CreateInvoiceRequest, Invoice, InvoiceStatus,
    PendingTransactionEvent,
};
use crate::nats::EventPublisher;
use crate::store::Store;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

pub struct AccountService {
    store: Arc<dyn Store>,
    ledger: Ledger,
}

impl AccountService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        let ledger = Ledger::new(store.clone());
        AccountService { store, ledger }
    }

    /// Create a merchant account with a freshly generated API key
    pub async fn create_account(&self, request: CreateAccountRequest) -> Result<Account> {
        validator::Validate::validate(&request)?;

        let account = Account::new(&request.name, &request.email);
        self.store.create_account(&account).await?;

        info!(account_id = %account.id, "Account created");
        Ok(account)
    }

    pub async fn find_by_api_key(&self, api_key: &str) -> Result<Account> {
        self.ledger.find_by_api_key(api_key).await
    }

    pub async fn find_by_id(&self, account_id: Uuid) -> Result<Account> {
        self.ledger.find_by_id(account_id).await
    }
}

/// Result of applying a fraud decision to an invoice
#[derive(Debug, Clone)]
pub struct AppliedResult {
    pub invoice: Invoice,
    pub transition: Transition,
}

/// Settlement orchestrator: ties invoices, balances and the event bridge together.
pub struct InvoiceService {
    store: Arc<dyn Store>,
    publisher: Arc<dyn EventPublisher>,
    policy: Arc<dyn ClassificationPolicy>,
}

impl InvoiceService {
    pub fn new(
        store: Arc<dyn Store>,
        publisher: Arc<dyn EventPublisher>,
        policy: Arc<dyn ClassificationPolicy>,
    ) -> Self {
        InvoiceService {
            store,
            publisher,
            policy,
        }
    }

    /// Create an invoice for the account owning `api_key`.
    ///
    /// Pending invoices are only persisted once the broker has accepted their
    /// evaluation request. Approved invoices are inserted and credited in the
    /// same transaction.
    pub async fn create_invoice(
        &self,
        api_key: &str,
        request: CreateInvoiceRequest,
    ) -> Result<Invoice> {
        let account = self.store.get_account_by_api_key(api_key).await?;
        validator::Validate::validate(&request)?;

        let mut invoice = Invoice::new(account.id, &request)?;
        let status = invoice.classify(self.policy.as_ref())?;

        if status == InvoiceStatus::Pending {
            let event = PendingTransactionEvent::for_invoice(&invoice);
            self.publisher
                .publish_pending_transaction(&event)
                .await
                .map_err(|e| {
                    error!(invoice_id = %invoice.id, "Failed to publish pending transaction: {}", e);
                    match e {
                        GatewayError::PublishFailure(_) => e,
                        other => GatewayError::PublishFailure(other.to_string()),
                    }
                })?;
        }

        // Lock order: account row first, then the invoice insert and its
        // foreign key share lock on the same row.
        let mut tx = self.store.begin().await?;
        if status == InvoiceStatus::Approved {
            Ledger::credit(tx.as_mut(), account.id, invoice.amount).await?;
        }
        tx.insert_invoice(&invoice).await?;
        tx.commit().await?;

        if status == InvoiceStatus::Approved {
            metrics::BALANCE_UPDATES.inc();
        }
        metrics::INVOICES_CREATED
            .with_label_values(&[status.as_str()])
            .inc();
        info!(
            invoice_id = %invoice.id,
            account_id = %account.id,
            amount = %invoice.amount,
            status = %status,
            "Invoice created"
        );

        Ok(invoice)
    }

    pub async fn get_invoice(&self, invoice_id: Uuid, api_key: &str) -> Result<Invoice> {
        let invoice = self.store.get_invoice(invoice_id).await?;
        let account = self.store.get_account_by_api_key(api_key).await?;

        if invoice.account_id != account.id {
            return Err(GatewayError::Unauthorized);
        }
        Ok(invoice)
    }

    pub async fn list_invoices_by_api_key(&self, api_key: &str) -> Result<Vec<Invoice>> {
        let account = self.store.get_account_by_api_key(api_key).await?;
        self.store.list_invoices_by_account(account.id).await
    }

    /// Apply an external fraud decision. The invoice row stays locked for the
    /// whole check-and-write so redelivered or concurrent results credit at
    /// most once.
    pub async fn apply_transaction_result(
        &self,
        invoice_id: Uuid,
        status: InvoiceStatus,
    ) -> Result<AppliedResult> {
        let mut tx = self.store.begin().await?;
        let mut invoice = tx.lock_invoice(invoice_id).await?;
        let transition = invoice.resolve(status)?;

        if transition == Transition::Unchanged {
            info!(invoice_id = %invoice_id, status = %status, "Result already applied");
            return Ok(AppliedResult {
                invoice,
                transition,
            });
        }

        if invoice.status == InvoiceStatus::Approved {
            Ledger::credit(tx.as_mut(), invoice.account_id, invoice.amount).await?;
        }
        tx.update_invoice_status(&invoice).await?;
        tx.commit().await?;

        if invoice.status == InvoiceStatus::Approved {
            metrics::BALANCE_UPDATES.inc();
        }
        info!(
            invoice_id = %invoice_id,
            account_id = %invoice.account_id,
            status = %invoice.status,
            "Transaction result applied"
        );

        Ok(AppliedResult {
            invoice,
            transition,
        })
    }
}
