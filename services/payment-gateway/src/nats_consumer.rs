// Transaction result consumer - applies fraud decisions published by the
// risk-scoring service back onto invoices

use crate::config::NatsConfig;
use crate::errors::{GatewayError, Result};
use crate::lifecycle::Transition;
use crate::metrics;
use crate::models::TransactionResultEvent;
use crate::nats::NatsConnection;
use crate::services::InvoiceService;
use async_nats::jetstream;
use async_nats::jetstream::consumer::{pull, PullConsumer};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Where result payloads come from. One message is in flight at a time.
#[async_trait]
pub trait ResultSource: Send {
    /// Waits for the next payload. Must be cancel-safe: the run loop drops
    /// this future when shutdown is signalled.
    async fn receive(&mut self) -> Result<Vec<u8>>;

    /// Acknowledges the last received payload.
    async fn acknowledge(&mut self) -> Result<()>;

    async fn close(&mut self);
}

/// Durable JetStream pull consumer. Every gateway instance configured with
/// the same consumer group shares one durable consumer.
pub struct NatsResultSource {
    consumer: PullConsumer,
    messages: Option<pull::Stream>,
    in_flight: Option<jetstream::Message>,
}

impl NatsResultSource {
    pub async fn new(connection: &NatsConnection, config: &NatsConfig) -> Result<Self> {
        let stream = connection.ensure_stream(config).await?;

        let consumer: PullConsumer = match stream.get_consumer(&config.consumer_group).await {
            Ok(consumer) => consumer,
            Err(_) => {
                info!("Consumer {} not found, creating...", config.consumer_group);
                stream
                    .create_consumer(pull::Config {
                        durable_name: Some(config.consumer_group.clone()),
                        filter_subject: config.transaction_results_subject.clone(),
                        ack_policy: jetstream::consumer::AckPolicy::Explicit,
                        ..Default::default()
                    })
                    .await
                    .map_err(|e| {
                        GatewayError::Broker(format!("Failed to create consumer: {}", e))
                    })?
            }
        };

        info!(
            "Transaction result consumer ready: stream={}, consumer={}",
            config.stream_name, config.consumer_group
        );

        Ok(NatsResultSource {
            consumer,
            messages: None,
            in_flight: None,
        })
    }
}

#[async_trait]
impl ResultSource for NatsResultSource {
    async fn receive(&mut self) -> Result<Vec<u8>> {
        if self.messages.is_none() {
            let messages = self
                .consumer
                .messages()
                .await
                .map_err(|e| GatewayError::Broker(format!("Failed to open message stream: {}", e)))?;
            self.messages = Some(messages);
        }

        let Some(messages) = self.messages.as_mut() else {
            return Err(GatewayError::Broker("Message stream unavailable".to_string()));
        };

        match messages.next().await {
            Some(Ok(message)) => {
                let payload = message.payload.to_vec();
                self.in_flight = Some(message);
                Ok(payload)
            }
            Some(Err(e)) => {
                self.messages = None;
                Err(GatewayError::Broker(e.to_string()))
            }
            None => {
                self.messages = None;
                Err(GatewayError::Broker("Message stream ended".to_string()))
            }
        }
    }

    async fn acknowledge(&mut self) -> Result<()> {
        if let Some(message) = self.in_flight.take() {
            message
                .ack()
                .await
                .map_err(|e| GatewayError::Broker(format!("Failed to ack message: {}", e)))?;
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.in_flight = None;
        self.messages = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Applied,
    Unchanged,
    Malformed,
    Failed,
}

impl MessageOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            MessageOutcome::Applied => "applied",
            MessageOutcome::Unchanged => "unchanged",
            MessageOutcome::Malformed => "malformed",
            MessageOutcome::Failed => "failed",
        }
    }
}

pub struct TransactionResultConsumer<S> {
    source: S,
    service: Arc<InvoiceService>,
    retry_backoff: Duration,
}

impl<S: ResultSource> TransactionResultConsumer<S> {
    pub fn new(source: S, service: Arc<InvoiceService>, retry_backoff: Duration) -> Self {
        TransactionResultConsumer {
            source,
            service,
            retry_backoff,
        }
    }

    /// Drains results until `shutdown` flips to true or its sender is dropped.
    /// A message that is being applied always runs to completion first.
    /// A pending read is dropped on shutdown. `pull::Stream::next` is
    /// cancel-safe, so no message is taken off the stream and lost.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting transaction result consumer");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let received = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                received = self.source.receive() => received,
            };

            match received {
                Ok(payload) => {
                    process_payload(&self.service, &payload).await;
                    if let Err(e) = self.source.acknowledge().await {
                        error!("{}", e);
                    }
                }
                Err(e) => {
                    metrics::BROKER_READ_ERRORS.inc();
                    error!(
                        "Error receiving transaction result: {}. Retrying in {:?}",
                        e, self.retry_backoff
                    );

                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(self.retry_backoff) => {}
                    }
                }
            }
        }

        self.source.close().await;
        info!("Transaction result consumer stopped");
    }

    /// Decode and apply one payload. Failures are logged and never retried;
    /// the caller acknowledges every message.
    pub async fn process_message(&self, payload: &[u8]) -> MessageOutcome {
        process_payload(&self.service, payload).await
    }
}

async fn process_payload(service: &InvoiceService, payload: &[u8]) -> MessageOutcome {
    let outcome = match serde_json::from_slice::<TransactionResultEvent>(payload) {
        Ok(event) => apply_event(service, event).await,
        Err(e) => {
            warn!("Failed to parse transaction result: {}. Skipping message", e);
            MessageOutcome::Malformed
        }
    };

    metrics::TRANSACTION_RESULTS
        .with_label_values(&[outcome.as_str()])
        .inc();
    outcome
}

async fn apply_event(service: &InvoiceService, event: TransactionResultEvent) -> MessageOutcome {
    match service
        .apply_transaction_result(event.invoice_id, event.status)
        .await
    {
        Ok(applied) => match applied.transition {
            Transition::Applied => MessageOutcome::Applied,
            Transition::Unchanged => MessageOutcome::Unchanged,
        },
        Err(e) if e.is_client_error() => {
            warn!(
                invoice_id = %event.invoice_id,
                status = %event.status,
                "Transaction result rejected: {}", e
            );
            MessageOutcome::Failed
        }
        Err(e) => {
            error!(
                invoice_id = %event.invoice_id,
                status = %event.status,
                "Failed to apply transaction result: {}", e
            );
            MessageOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ThresholdPolicy;
    use crate::memory_store::MemoryStore;
    use crate::models::{Account, Invoice, InvoiceStatus};
    use crate::nats::MockEventPublisher;
    use crate::store::Store;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use uuid::Uuid;

    /// Replays a fixed script, then blocks forever.
    struct ScriptedSource {
        script: VecDeque<Result<Vec<u8>>>,
        receives: Arc<AtomicUsize>,
        acks: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ResultSource for ScriptedSource {
        async fn receive(&mut self) -> Result<Vec<u8>> {
            self.receives.fetch_add(1, Ordering::SeqCst);
            match self.script.pop_front() {
                Some(next) => next,
                None => std::future::pending().await,
            }
        }

        async fn acknowledge(&mut self) -> Result<()> {
            self.acks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct Harness {
        store: MemoryStore,
        service: Arc<InvoiceService>,
        account: Account,
        invoice: Invoice,
    }

    async fn harness() -> Harness {
        let store = MemoryStore::new();
        let account = Account::new("Shop", "shop@example.com");
        store.create_account(&account).await.unwrap();

        let now = Utc::now();
        let invoice = Invoice {
            id: Uuid::new_v4(),
            account_id: account.id,
            amount: dec!(500),
            status: InvoiceStatus::Pending,
            description: "Order".to_string(),
            payment_type: "credit_card".to_string(),
            card_last_digits: "4242".to_string(),
            created_at: now,
            updated_at: now,
        };
        let mut tx = store.begin().await.unwrap();
        tx.insert_invoice(&invoice).await.unwrap();
        tx.commit().await.unwrap();

        let service = Arc::new(InvoiceService::new(
            Arc::new(store.clone()),
            Arc::new(MockEventPublisher::new()),
            Arc::new(ThresholdPolicy::new(dec!(100))),
        ));

        Harness {
            store,
            service,
            account,
            invoice,
        }
    }

    fn result_payload(invoice_id: Uuid, status: &str) -> Vec<u8> {
        format!(r#"{{"invoice_id":"{}","status":"{}"}}"#, invoice_id, status).into_bytes()
    }

    fn scripted(
        script: Vec<Result<Vec<u8>>>,
    ) -> (ScriptedSource, Arc<AtomicUsize>, Arc<AtomicUsize>, Arc<AtomicBool>) {
        let receives = Arc::new(AtomicUsize::new(0));
        let acks = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicBool::new(false));
        let source = ScriptedSource {
            script: script.into(),
            receives: receives.clone(),
            acks: acks.clone(),
            closed: closed.clone(),
        };
        (source, receives, acks, closed)
    }

    async fn wait_for(counter: &AtomicUsize, expected: usize) {
        while counter.load(Ordering::SeqCst) < expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_process_message_outcomes() {
        let h = harness().await;
        let (source, _, _, _) = scripted(vec![]);
        let consumer =
            TransactionResultConsumer::new(source, h.service.clone(), Duration::from_secs(5));

        assert_eq!(
            consumer.process_message(b"{not json").await,
            MessageOutcome::Malformed
        );
        assert_eq!(
            consumer.process_message(&result_payload(h.invoice.id, "bogus")).await,
            MessageOutcome::Malformed
        );
        assert_eq!(
            consumer.process_message(&result_payload(Uuid::new_v4(), "approved")).await,
            MessageOutcome::Failed
        );
        assert_eq!(
            consumer.process_message(&result_payload(h.invoice.id, "approved")).await,
            MessageOutcome::Applied
        );
        assert_eq!(
            consumer.process_message(&result_payload(h.invoice.id, "approved")).await,
            MessageOutcome::Unchanged
        );
        assert_eq!(
            consumer.process_message(&result_payload(h.invoice.id, "rejected")).await,
            MessageOutcome::Failed
        );

        let account = h.store.get_account(h.account.id).await.unwrap();
        assert_eq!(account.balance, dec!(500));
    }

    #[tokio::test]
    async fn test_malformed_message_does_not_stop_loop() {
        let h = harness().await;
        let (source, _, acks, closed) = scripted(vec![
            Ok(b"garbage".to_vec()),
            Ok(result_payload(h.invoice.id, "approved")),
        ]);
        let consumer =
            TransactionResultConsumer::new(source, h.service.clone(), Duration::from_secs(5));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(consumer.run(shutdown_rx));

        tokio::time::timeout(Duration::from_secs(5), wait_for(&acks, 2))
            .await
            .unwrap();
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(closed.load(Ordering::SeqCst));
        let invoice = h.store.get_invoice(h.invoice.id).await.unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Approved);
        assert_eq!(
            h.store.get_account(h.account.id).await.unwrap().balance,
            dec!(500)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_error_backs_off_then_retries() {
        let h = harness().await;
        let (source, receives, acks, _) = scripted(vec![
            Err(GatewayError::Broker("connection lost".to_string())),
            Ok(result_payload(h.invoice.id, "rejected")),
        ]);
        let backoff = Duration::from_secs(5);
        let consumer = TransactionResultConsumer::new(source, h.service.clone(), backoff);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let started = tokio::time::Instant::now();
        let handle = tokio::spawn(consumer.run(shutdown_rx));

        wait_for(&acks, 1).await;
        assert!(started.elapsed() >= backoff);
        assert!(receives.load(Ordering::SeqCst) >= 2);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let invoice = h.store.get_invoice(h.invoice.id).await.unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff() {
        let h = harness().await;
        let (source, receives, _, closed) = scripted(vec![Err(GatewayError::Broker(
            "connection lost".to_string(),
        ))]);
        let consumer =
            TransactionResultConsumer::new(source, h.service.clone(), Duration::from_secs(3600));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(consumer.run(shutdown_rx));

        wait_for(&receives, 1).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(receives.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_while_waiting_for_message() {
        let h = harness().await;
        let (source, receives, acks, closed) = scripted(vec![]);
        let consumer =
            TransactionResultConsumer::new(source, h.service.clone(), Duration::from_secs(5));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(consumer.run(shutdown_rx));

        tokio::time::timeout(Duration::from_secs(5), wait_for(&receives, 1))
            .await
            .unwrap();
        drop(shutdown_tx);
        handle.await.unwrap();

        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(receives.load(Ordering::SeqCst), 1);
        assert_eq!(acks.load(Ordering::SeqCst), 0);
        let invoice = h.store.get_invoice(h.invoice.id).await.unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Pending);
    }
}
