use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use orders_outbox::config::AppConfig;
use orders_outbox::domain::order::{OrderCommandHandler, ProductItem};
use orders_outbox::messaging::{EventPublisher, InMemoryPublisher, RedpandaClient};
use orders_outbox::metrics::{self, Metrics};
use orders_outbox::outbox::{EnvelopeBuilder, EventRouter, OutboxRelay};
use orders_outbox::store::{InMemoryOrderStore, OrderStore, PgOrderStore, StoreError};
use orders_outbox::utils::{retry_with_backoff, RetryConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default filter, e.g. RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,orders_outbox=debug")),
        )
        .init();

    tracing::info!("🚀 Starting orders outbox service");

    let config = AppConfig::from_env().context("Invalid configuration")?;

    // === 1. Durable store ===
    let store = build_store(&config).await?;

    // === 2. Broker ===
    let publisher = build_publisher(&config)?;

    // === 3. Prometheus metrics ===
    let metrics = Arc::new(Metrics::new()?);
    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || {
        let system = actix_web::rt::System::new();
        system.block_on(async {
            if let Err(e) = metrics::start_metrics_server(metrics_registry, metrics_port).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    });

    // === 4. Outbox relay ===
    let relay = Arc::new(
        OutboxRelay::new(
            store.clone(),
            publisher,
            EventRouter::new(config.topics.clone()),
            config.relay.clone(),
        )
        .with_metrics(metrics.clone()),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let relay_task = tokio::spawn(relay.clone().run(shutdown_rx));

    let handler = OrderCommandHandler::new(store, EnvelopeBuilder::default(), relay);

    // === 5. Optional demo lifecycle ===
    if config.run_demo {
        if let Err(e) = run_demo(&handler).await {
            tracing::error!(error = %e, "Demo lifecycle failed");
        }
    }

    tracing::info!("✅ Running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutdown requested, letting the relay finish its batch");
    // Err only if the relay already exited.
    let _ = shutdown_tx.send(true);
    relay_task.await?;

    tracing::info!("👋 Stopped");
    Ok(())
}

async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn OrderStore>> {
    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set, using the in-memory store");
        return Ok(Arc::new(InMemoryOrderStore::new()));
    };

    let store = retry_with_backoff(&RetryConfig::default(), "postgres_connect", |_| async move {
        let store = PgOrderStore::connect(url, 10).await?;
        store.migrate().await?;
        Ok::<_, StoreError>(store)
    })
    .await
    .context("Failed to connect to PostgreSQL")?;

    Ok(Arc::new(store))
}

fn build_publisher(config: &AppConfig) -> anyhow::Result<Arc<dyn EventPublisher>> {
    match config.kafka_brokers.as_deref() {
        Some(brokers) => {
            tracing::info!(brokers = %brokers, "Publishing to Redpanda");
            Ok(Arc::new(RedpandaClient::new(brokers, config.relay.publish_timeout)?))
        }
        None => {
            tracing::warn!("KAFKA_BROKERS not set, published events stay in memory");
            Ok(Arc::new(InMemoryPublisher::new()))
        }
    }
}

async fn run_demo(handler: &OrderCommandHandler) -> anyhow::Result<()> {
    tracing::info!("📝 Demonstrating order lifecycle with the transactional outbox");

    let order = handler
        .create_order(
            uuid::Uuid::new_v4(),
            "221B Baker Street",
            vec![
                ProductItem::new("Keyboard", 7_999, 1),
                ProductItem::new("USB cable", 599, 2),
            ],
        )
        .await?;
    tracing::info!(order_id = %order.id, version = order.version, "Order created");

    let order = handler
        .add_product_item(order.id, ProductItem::new("Mouse pad", 1_299, 1))
        .await?;
    let order = handler.pay(order.id, format!("pay-{}", uuid::Uuid::new_v4())).await?;
    let order = handler.submit(order.id).await?;
    let order = handler.complete(order.id).await?;

    tracing::info!(
        order_id = %order.id,
        version = order.version,
        total_cents = order.total_cents(),
        status = %order.status,
        "🎉 Demo lifecycle complete"
    );
    Ok(())
}
