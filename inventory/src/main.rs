//! Inventory service binary.

use album_store_core::environment::SystemClock;
use album_store_core::event_bus::EventBus;
use album_store_postgres::PostgresInventoryStore;
use album_store_redpanda::RedpandaEventBus;
use album_store_runtime::metrics::PrometheusMetrics;
use anyhow::Context;
use inventory_service::{Application, Config};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.server.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        brokers = %config.redpanda.brokers,
        port = config.server.port,
        failure_reason_mode = ?config.reservation.failure_reason_mode,
        "Starting inventory service"
    );

    let metrics = PrometheusMetrics::install().context("installing metrics recorder")?;

    info!("Connecting to inventory database...");
    let store = PostgresInventoryStore::connect(&config.postgres.url, &config.pool_settings())
        .await
        .context("connecting to the inventory database")?;
    store.migrate().await.context("migrating the inventory schema")?;
    let store = Arc::new(store);

    let event_bus: Arc<dyn EventBus> = Arc::new(
        RedpandaEventBus::builder()
            .brokers(config.redpanda.brokers.clone())
            .auto_offset_reset(config.redpanda.auto_offset_reset.clone())
            .build()
            .context("creating the event bus")?,
    );

    let app = Application::build(&config, store, event_bus, Arc::new(SystemClock), metrics).await?;
    app.run().await?;
    Ok(())
}
