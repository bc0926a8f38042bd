//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use payment_gateway::errors::{GatewayError, Result};
use payment_gateway::models::{CreateInvoiceRequest, PendingTransactionEvent};
use payment_gateway::nats::EventPublisher;
use payment_gateway::nats_consumer::ResultSource;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Keeps every published event in memory.
#[derive(Default, Clone)]
pub struct RecordingPublisher {
    events: Arc<Mutex<Vec<PendingTransactionEvent>>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<PendingTransactionEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish_pending_transaction(&self, event: &PendingTransactionEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Result source fed through a channel, standing in for the broker.
pub struct ChannelSource {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    acks: Arc<AtomicUsize>,
}

impl ChannelSource {
    pub fn new() -> (Self, mpsc::UnboundedSender<Vec<u8>>, Arc<AtomicUsize>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let acks = Arc::new(AtomicUsize::new(0));
        (
            ChannelSource {
                rx,
                acks: acks.clone(),
            },
            tx,
            acks,
        )
    }
}

#[async_trait]
impl ResultSource for ChannelSource {
    async fn receive(&mut self) -> Result<Vec<u8>> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| GatewayError::Broker("channel closed".to_string()))
    }

    async fn acknowledge(&mut self) -> Result<()> {
        self.acks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}

pub fn invoice_request(amount: Decimal) -> CreateInvoiceRequest {
    CreateInvoiceRequest {
        amount,
        description: "Integration order".to_string(),
        payment_type: "credit_card".to_string(),
        card_number: "5555555555554444".to_string(),
        cvv: "321".to_string(),
        expiry_month: 1,
        expiry_year: 2032,
        cardholder_name: "John Smith".to_string(),
    }
}

pub async fn wait_for_acks(acks: &AtomicUsize, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while acks.load(Ordering::SeqCst) < expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("consumer did not acknowledge in time");
}
