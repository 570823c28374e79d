//! Order processor service.
//!
//! Run with a broker at `REDPANDA_BROKERS`; see [`ProcessorConfig`] for the
//! other variables.

use anyhow::Context;
use order_processor::{OrderConsumer, OrderProcessor, ProcessorConfig, StockLedger};
use std::sync::Arc;
use stockflow_core::message_bus::MessageBus;
use stockflow_redpanda::RedpandaMessageBus;
use stockflow_runtime::metrics::MetricsServer;
use tokio::sync::broadcast;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ProcessorConfig::from_env().context("Failed to load configuration")?;
    info!(
        brokers = %config.brokers,
        orders = %config.topology.orders,
        confirmations = %config.topology.confirmations,
        failure_probability = config.chaos.failure_probability(),
        "Starting order processor"
    );

    let mut metrics = config.metrics_addr.map(MetricsServer::new);
    if let Some(server) = metrics.as_mut() {
        server.start().context("Failed to start metrics server")?;
    }

    let bus: Arc<dyn MessageBus> = Arc::new(
        RedpandaMessageBus::builder()
            .brokers(&config.brokers)
            .consumer_group(&config.consumer_group)
            .auto_offset_reset(&config.auto_offset_reset)
            .build()
            .context("Failed to connect to broker")?,
    );

    let ledger = StockLedger::with_stock(config.initial_stock.clone());
    let processor = Arc::new(OrderProcessor::new(
        ledger,
        Arc::clone(&bus),
        config.topology.clone(),
        config.chaos,
    ));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let consumer = OrderConsumer::new(processor, bus, config.topology.orders.clone(), shutdown_rx)
        .spawn()
        .await
        .context("Failed to subscribe to orders")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(());
    consumer.await.context("Order consumer panicked")?;

    info!("Order processor stopped");
    Ok(())
}
