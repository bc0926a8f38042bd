//! Invoice state machine.
//!
//! `pending` is the only non-terminal status. Classification decides the
//! initial status once at creation; afterwards an invoice can only move
//! `pending -> approved` or `pending -> rejected`.

use crate::errors::{GatewayError, Result};
use crate::models::{card_last_digits, CreateInvoiceRequest, Invoice, InvoiceStatus};
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Decides the initial status of a freshly created invoice.
pub trait ClassificationPolicy: Send + Sync {
    fn classify(&self, invoice: &Invoice) -> InvoiceStatus;
}

impl<F> ClassificationPolicy for F
where
    F: Fn(&Invoice) -> InvoiceStatus + Send + Sync,
{
    fn classify(&self, invoice: &Invoice) -> InvoiceStatus {
        self(invoice)
    }
}

/// Sends invoices above `review_threshold` to external fraud review and
/// approves everything else immediately.
#[derive(Debug, Clone)]
pub struct ThresholdPolicy {
    review_threshold: Decimal,
}

impl ThresholdPolicy {
    pub fn new(review_threshold: Decimal) -> Self {
        Self { review_threshold }
    }

    pub fn review_threshold(&self) -> Decimal {
        self.review_threshold
    }
}

impl ClassificationPolicy for ThresholdPolicy {
    fn classify(&self, invoice: &Invoice) -> InvoiceStatus {
        if invoice.amount > self.review_threshold {
            InvoiceStatus::Pending
        } else {
            InvoiceStatus::Approved
        }
    }
}

/// Outcome of resolving an invoice against a broker result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// The invoice already carried the requested terminal status.
    Unchanged,
}

/// Decimal places kept by the `NUMERIC(20, 4)` amount and balance columns.
pub const AMOUNT_SCALE: u32 = 4;

/// Amounts must be positive and fit the stored scale exactly.
pub(crate) fn validate_amount(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO || amount.normalize().scale() > AMOUNT_SCALE {
        return Err(GatewayError::InvalidAmount(amount));
    }
    Ok(())
}

impl Invoice {
    /// Builds a `pending` invoice for the account. Only the card's last four
    /// digits are kept.
    pub fn new(account_id: Uuid, request: &CreateInvoiceRequest) -> Result<Self> {
        validate_amount(request.amount)?;

        let now = Utc::now();
        Ok(Invoice {
            id: Uuid::new_v4(),
            account_id,
            amount: request.amount,
            status: InvoiceStatus::Pending,
            description: request.description.clone(),
            payment_type: request.payment_type.clone(),
            card_last_digits: card_last_digits(&request.card_number),
            created_at: now,
            updated_at: now,
        })
    }

    /// Assigns the initial status chosen by `policy`.
    pub fn classify(&mut self, policy: &dyn ClassificationPolicy) -> Result<InvoiceStatus> {
        validate_amount(self.amount)?;
        if self.status != InvoiceStatus::Pending {
            return Err(GatewayError::InvalidStatus {
                from: self.status,
                to: self.status,
            });
        }

        self.status = policy.classify(self);
        Ok(self.status)
    }

    pub fn approve(&mut self) -> Result<()> {
        self.transition_to(InvoiceStatus::Approved)
    }

    pub fn reject(&mut self) -> Result<()> {
        self.transition_to(InvoiceStatus::Rejected)
    }

    /// Applies a fraud evaluation result. Re-applying the status the invoice
    /// already has is a no-op so redelivered results never settle twice.
    pub fn resolve(&mut self, target: InvoiceStatus) -> Result<Transition> {
        match target {
            InvoiceStatus::Pending => Err(GatewayError::InvalidStatus {
                from: self.status,
                to: target,
            }),
            _ if self.status == target => Ok(Transition::Unchanged),
            InvoiceStatus::Approved => self.approve().map(|_| Transition::Applied),
            InvoiceStatus::Rejected => self.reject().map(|_| Transition::Applied),
        }
    }

    fn transition_to(&mut self, target: InvoiceStatus) -> Result<()> {
        if self.status != InvoiceStatus::Pending {
            return Err(GatewayError::InvalidStatus {
                from: self.status,
                to: target,
            });
        }

        self.status = target;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request(amount: Decimal) -> CreateInvoiceRequest {
        CreateInvoiceRequest {
            amount,
            description: "Order #1".to_string(),
            payment_type: "credit_card".to_string(),
            card_number: "4111111111111111".to_string(),
            cvv: "123".to_string(),
            expiry_month: 12,
            expiry_year: 2030,
            cardholder_name: "Jane Doe".to_string(),
        }
    }

    fn pending_invoice(amount: Decimal) -> Invoice {
        Invoice::new(Uuid::new_v4(), &request(amount)).unwrap()
    }

    #[test]
    fn test_new_invoice_rejects_non_positive_amount() {
        for amount in [dec!(0), dec!(-0.01), dec!(-100)] {
            let result = Invoice::new(Uuid::new_v4(), &request(amount));
            assert!(matches!(result, Err(GatewayError::InvalidAmount(a)) if a == amount));
        }
    }

    #[test]
    fn test_new_invoice_rejects_excess_precision() {
        for amount in [dec!(500.00005), dec!(0.00001)] {
            let result = Invoice::new(Uuid::new_v4(), &request(amount));
            assert!(matches!(result, Err(GatewayError::InvalidAmount(a)) if a == amount));
        }

        // Trailing zeros beyond the stored scale lose nothing.
        let invoice = Invoice::new(Uuid::new_v4(), &request(dec!(500.01000))).unwrap();
        assert_eq!(invoice.amount, dec!(500.01));
        assert!(Invoice::new(Uuid::new_v4(), &request(dec!(0.0001))).is_ok());
    }

    #[test]
    fn test_new_invoice_masks_card() {
        let invoice = pending_invoice(dec!(10));
        assert_eq!(invoice.status, InvoiceStatus::Pending);
        assert_eq!(invoice.card_last_digits, "1111");
    }

    #[test]
    fn test_threshold_policy() {
        let policy = ThresholdPolicy::new(dec!(10000));

        let mut small = pending_invoice(dec!(100));
        assert_eq!(small.classify(&policy).unwrap(), InvoiceStatus::Approved);

        let mut at_threshold = pending_invoice(dec!(10000));
        assert_eq!(at_threshold.classify(&policy).unwrap(), InvoiceStatus::Approved);

        let mut large = pending_invoice(dec!(10000.01));
        assert_eq!(large.classify(&policy).unwrap(), InvoiceStatus::Pending);
    }

    #[test]
    fn test_closure_policy() {
        let reject_all = |_: &Invoice| InvoiceStatus::Rejected;
        let mut invoice = pending_invoice(dec!(5));
        assert_eq!(invoice.classify(&reject_all).unwrap(), InvoiceStatus::Rejected);
    }

    #[test]
    fn test_classify_rejects_invalid_amount() {
        let mut invoice = pending_invoice(dec!(5));
        invoice.amount = Decimal::ZERO;

        let result = invoice.classify(&ThresholdPolicy::new(dec!(100)));
        assert!(matches!(result, Err(GatewayError::InvalidAmount(_))));
        assert_eq!(invoice.status, InvoiceStatus::Pending);
    }

    #[test]
    fn test_pending_transitions() {
        let mut invoice = pending_invoice(dec!(50));
        invoice.approve().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Approved);

        let mut invoice = pending_invoice(dec!(50));
        invoice.reject().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Rejected);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut approved = pending_invoice(dec!(50));
        approved.approve().unwrap();

        assert!(matches!(approved.approve(), Err(GatewayError::InvalidStatus { .. })));
        assert!(matches!(approved.reject(), Err(GatewayError::InvalidStatus { .. })));
        assert_eq!(approved.status, InvoiceStatus::Approved);

        let mut rejected = pending_invoice(dec!(50));
        rejected.reject().unwrap();

        assert!(matches!(rejected.approve(), Err(GatewayError::InvalidStatus { .. })));
        assert_eq!(rejected.status, InvoiceStatus::Rejected);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let mut invoice = pending_invoice(dec!(500));

        assert_eq!(invoice.resolve(InvoiceStatus::Approved).unwrap(), Transition::Applied);
        assert_eq!(invoice.resolve(InvoiceStatus::Approved).unwrap(), Transition::Unchanged);
        assert_eq!(invoice.status, InvoiceStatus::Approved);
    }

    #[test]
    fn test_resolve_conflicting_result() {
        let mut invoice = pending_invoice(dec!(500));
        invoice.reject().unwrap();

        let result = invoice.resolve(InvoiceStatus::Approved);
        assert!(matches!(
            result,
            Err(GatewayError::InvalidStatus {
                from: InvoiceStatus::Rejected,
                to: InvoiceStatus::Approved
            })
        ));
    }

    #[test]
    fn test_resolve_to_pending_is_invalid() {
        let mut invoice = pending_invoice(dec!(500));
        assert!(invoice.resolve(InvoiceStatus::Pending).is_err());
        assert_eq!(invoice.status, InvoiceStatus::Pending);
    }
}
