use crate::config::NatsConfig;
use crate::errors::{GatewayError, Result};
use crate::metrics;
use crate::models::PendingTransactionEvent;
use async_nats::jetstream;
use async_nats::Client;
use async_trait::async_trait;
use tracing::{error, info};

/// Broker connection opened once at startup and shared by the producer and
/// the result consumer.
#[derive(Clone)]
pub struct NatsConnection {
    client: Client,
    jetstream: jetstream::Context,
}

impl NatsConnection {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| GatewayError::Broker(e.to_string()))?;

        info!("Connected to NATS at {}", url);

        let jetstream = jetstream::new(client.clone());
        Ok(NatsConnection { client, jetstream })
    }

    pub fn jetstream(&self) -> &jetstream::Context {
        &self.jetstream
    }

    /// Get or create the stream carrying both transaction subjects.
    pub async fn ensure_stream(&self, config: &NatsConfig) -> Result<jetstream::stream::Stream> {
        match self.jetstream.get_stream(&config.stream_name).await {
            Ok(stream) => Ok(stream),
            Err(_) => {
                info!("Stream {} not found, creating...", config.stream_name);
                self.jetstream
                    .create_stream(jetstream::stream::Config {
                        name: config.stream_name.clone(),
                        subjects: vec![
                            config.pending_transactions_subject.clone(),
                            config.transaction_results_subject.clone(),
                        ],
                        max_messages: 1_000_000,
                        ..Default::default()
                    })
                    .await
                    .map_err(|e| GatewayError::Broker(format!("Failed to create stream: {}", e)))
            }
        }
    }

    /// Flushes buffered publishes before the process exits.
    pub async fn close(&self) {
        match self.client.flush().await {
            Ok(()) => info!("NATS connection flushed"),
            Err(e) => error!("Failed to flush NATS connection: {}", e),
        }
    }
}

/// Outbound side of the event bridge.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Returns once the broker has acknowledged the event.
    async fn publish_pending_transaction(&self, event: &PendingTransactionEvent) -> Result<()>;
}

pub struct NatsProducer {
    jetstream: jetstream::Context,
    subject: String,
}

impl NatsProducer {
    pub fn new(connection: &NatsConnection, subject: &str) -> Self {
        NatsProducer {
            jetstream: connection.jetstream().clone(),
            subject: subject.to_string(),
        }
    }
}

#[async_trait]
impl EventPublisher for NatsProducer {
    async fn publish_pending_transaction(&self, event: &PendingTransactionEvent) -> Result<()> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| GatewayError::PublishFailure(format!("Serialization error: {}", e)))?;

        let ack = self
            .jetstream
            .publish(self.subject.clone(), payload.into())
            .await
            .map_err(|e| {
                metrics::PENDING_EVENTS_PUBLISHED.with_label_values(&["failed"]).inc();
                GatewayError::PublishFailure(e.to_string())
            })?;

        ack.await.map_err(|e| {
            metrics::PENDING_EVENTS_PUBLISHED.with_label_values(&["failed"]).inc();
            GatewayError::PublishFailure(format!("Publish not acknowledged: {}", e))
        })?;

        metrics::PENDING_EVENTS_PUBLISHED.with_label_values(&["published"]).inc();
        info!(
            invoice_id = %event.invoice_id,
            account_id = %event.account_id,
            "Published pending transaction to subject {}",
            self.subject
        );

        Ok(())
    }
}
