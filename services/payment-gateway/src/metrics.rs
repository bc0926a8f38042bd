use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Once;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Business metrics
    pub static ref INVOICES_CREATED: IntCounterVec = IntCounterVec::new(
        Opts::new("invoices_created_total", "Invoices created by initial status"),
        &["status"]
    ).expect("metric can be created");

    pub static ref TRANSACTION_RESULTS: IntCounterVec = IntCounterVec::new(
        Opts::new("transaction_results_total", "Transaction results consumed by outcome"),
        &["outcome"]
    ).expect("metric can be created");

    pub static ref BALANCE_UPDATES: IntCounter = IntCounter::new(
        "ledger_balance_updates_total",
        "Committed account balance updates"
    ).expect("metric can be created");

    // NATS metrics
    pub static ref PENDING_EVENTS_PUBLISHED: IntCounterVec = IntCounterVec::new(
        Opts::new("pending_events_published_total", "Pending transaction events published"),
        &["status"]
    ).expect("metric can be created");

    pub static ref BROKER_READ_ERRORS: IntCounter = IntCounter::new(
        "broker_read_errors_total",
        "Failed reads from the transaction result stream"
    ).expect("metric can be created");
}

static REGISTER: Once = Once::new();

/// Register all metrics with the given registry
pub fn register_metrics(registry: &Registry) -> Result<(), Box<dyn std::error::Error>> {
    registry.register(Box::new(INVOICES_CREATED.clone()))?;
    registry.register(Box::new(TRANSACTION_RESULTS.clone()))?;
    registry.register(Box::new(BALANCE_UPDATES.clone()))?;
    registry.register(Box::new(PENDING_EVENTS_PUBLISHED.clone()))?;
    registry.register(Box::new(BROKER_READ_ERRORS.clone()))?;
    Ok(())
}

/// Registers the gateway metrics with the process-wide `REGISTRY` exactly once.
pub fn init() {
    REGISTER.call_once(|| {
        if let Err(e) = register_metrics(&REGISTRY) {
            tracing::error!("Failed to register metrics: {}", e);
        }
    });
}

/// Generate metrics output in Prometheus text format
pub fn metrics_handler() -> Result<String, Box<dyn std::error::Error>> {
    init();
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
