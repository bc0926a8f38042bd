use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use payment_gateway::{
    config::Config,
    database::Database,
    handlers,
    lifecycle::ThresholdPolicy,
    memory_store::MemoryStore,
    metrics,
    nats::{NatsConnection, NatsProducer},
    nats_consumer::{NatsResultSource, TransactionResultConsumer},
    services::{AccountService, InvoiceService},
    store::Store,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(config.logging.json);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    metrics::init();

    info!("Starting Payment Gateway on port {}", config.server.port);

    let (store, database): (Arc<dyn Store>, Option<Arc<Database>>) = if config.database.in_memory {
        warn!("Using in-memory store; data is lost on shutdown");
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        (store, None)
    } else {
        let db = Arc::new(
            Database::new(&config.database.url, config.database.max_connections)
                .await
                .context("Failed to connect to database")?,
        );
        db.ensure_schema().await.context("Failed to prepare schema")?;
        let store: Arc<dyn Store> = db.clone();
        (store, Some(db))
    };

    let nats = NatsConnection::connect(&config.nats.url)
        .await
        .context("Failed to connect to NATS")?;
    nats.ensure_stream(&config.nats)
        .await
        .context("Failed to prepare NATS stream")?;

    let review_threshold = config
        .risk
        .review_threshold()
        .map_err(|e| anyhow::anyhow!(e))?;
    let publisher = Arc::new(NatsProducer::new(
        &nats,
        &config.nats.pending_transactions_subject,
    ));
    let invoice_service = Arc::new(InvoiceService::new(
        store.clone(),
        publisher,
        Arc::new(ThresholdPolicy::new(review_threshold)),
    ));
    let account_service = Arc::new(AccountService::new(store));

    let source = NatsResultSource::new(&nats, &config.nats)
        .await
        .context("Failed to create transaction result consumer")?;
    let consumer = TransactionResultConsumer::new(
        source,
        invoice_service.clone(),
        config.nats.retry_backoff(),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_handle = tokio::spawn(consumer.run(shutdown_rx));

    let server = HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .app_data(web::Data::new(invoice_service.clone()))
            .app_data(web::Data::new(account_service.clone()))
            .configure(handlers::configure_routes)
    })
    .workers(config.server.workers)
    .bind((config.server.host.as_str(), config.server.port))?
    .run();

    let result = server.await;

    info!("HTTP server stopped, shutting down consumer");
    if shutdown_tx.send(true).is_err() {
        warn!("Transaction result consumer already stopped");
    }
    if let Err(e) = consumer_handle.await {
        error!("Transaction result consumer panicked: {}", e);
    }

    nats.close().await;
    if let Some(db) = database {
        db.close().await;
    }

    result?;
    Ok(())
}
