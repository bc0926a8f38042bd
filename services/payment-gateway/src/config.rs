use config::{ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub nats: NatsConfig,
    pub risk: RiskConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// Run against the in-memory store instead of Postgres.
    pub in_memory: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NatsConfig {
    pub url: String,
    pub stream_name: String,
    pub pending_transactions_subject: String,
    pub transaction_results_subject: String,
    /// Durable consumer name; instances sharing it split the result stream.
    pub consumer_group: String,
    pub retry_backoff_ms: u64,
}

impl NatsConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RiskConfig {
    /// Invoices strictly above this amount wait for an external fraud decision.
    pub review_threshold: String,
}

impl RiskConfig {
    pub fn review_threshold(&self) -> Result<Decimal, String> {
        Decimal::from_str(&self.review_threshold)
            .map_err(|e| format!("Invalid review threshold '{}': {}", self.review_threshold, e))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub json: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut builder = config::Config::builder()
            // Start with default configuration
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.workers", 4)?
            .set_default("database.url", "")?
            .set_default("database.max_connections", 10)?
            .set_default("database.in_memory", false)?
            .set_default("nats.url", "nats://localhost:4222")?
            .set_default("nats.stream_name", "TRANSACTIONS")?
            .set_default("nats.pending_transactions_subject", "pending_transactions")?
            .set_default("nats.transaction_results_subject", "transactions_result")?
            .set_default("nats.consumer_group", "payment-gateway")?
            .set_default("nats.retry_backoff_ms", 5000)?
            .set_default("risk.review_threshold", "10000")?
            .set_default("logging.json", false)?;

        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        } else {
            builder = builder.add_source(
                File::with_name(&format!("config/{}", environment)).required(false),
            );
        }

        builder = builder.add_source(Environment::with_prefix("PAYMENT_GATEWAY").separator("__"));

        if let Ok(db_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", db_url)?;
        }

        if let Ok(nats_url) = env::var("NATS_URL") {
            builder = builder.set_override("nats.url", nats_url)?;
        }

        if let Ok(port) = env::var("PAYMENT_GATEWAY_PORT") {
            builder = builder.set_override("server.port", port)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port cannot be 0".to_string());
        }

        if !self.database.in_memory && self.database.url.is_empty() {
            return Err("Database URL is required".to_string());
        }

        if self.nats.url.is_empty() {
            return Err("NATS URL is required".to_string());
        }

        if self.nats.consumer_group.is_empty() {
            return Err("NATS consumer group is required".to_string());
        }

        if self.nats.pending_transactions_subject == self.nats.transaction_results_subject {
            return Err("Pending and result subjects must differ".to_string());
        }

        if self.risk.review_threshold()? <= Decimal::ZERO {
            return Err("Review threshold must be positive".to_string());
        }

        Ok(())
    }
}
