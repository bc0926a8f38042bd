pub mod config;
pub mod database;
pub mod errors;
pub mod handlers;
pub mod ledger;
pub mod lifecycle;
pub mod memory_store;
pub mod metrics;
pub mod models;
pub mod nats;
pub mod nats_consumer;
pub mod services;
pub mod store;

pub use config::Config;
pub use errors::{GatewayError, Result};
