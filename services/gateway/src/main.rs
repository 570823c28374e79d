//! Order gateway demo driver.
//!
//! Submits the orders listed in `DEMO_ORDERS` one after another against a
//! running order processor and logs each outcome and the breaker state.

use anyhow::Context;
use order_gateway::{ConfirmationListener, GatewayConfig, GatewayError, OrderGateway};
use std::sync::Arc;
use stockflow_core::message_bus::MessageBus;
use stockflow_redpanda::RedpandaMessageBus;
use stockflow_runtime::CircuitBreaker;
use stockflow_runtime::metrics::MetricsServer;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = GatewayConfig::from_env().context("Failed to load configuration")?;
    info!(
        brokers = %config.brokers,
        orders = %config.topology.orders,
        confirmations = %config.topology.confirmations,
        deadline_ms = u64::try_from(config.order_deadline.as_millis()).unwrap_or(u64::MAX),
        "Starting order gateway"
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

    let gateway = OrderGateway::new(
        Arc::clone(&bus),
        CircuitBreaker::new(config.breaker.clone()),
        &config.topology,
        config.order_deadline,
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let listener = ConfirmationListener::new(
        bus,
        gateway.registry().clone(),
        config.topology.confirmations.clone(),
        shutdown_rx,
    )
    .spawn()
    .await
    .context("Failed to subscribe to confirmations")?;

    for demo in &config.demo_orders {
        match gateway.submit(&demo.item_id, demo.quantity).await {
            Ok(outcome) => info!(
                item_id = %demo.item_id,
                quantity = demo.quantity,
                ?outcome,
                breaker = ?gateway.breaker().state(),
                "Demo order finished"
            ),
            Err(GatewayError::InvalidRequest(reason)) => {
                warn!(item_id = %demo.item_id, quantity = demo.quantity, %reason, "Demo order rejected");
            }
            Err(e) => error!(item_id = %demo.item_id, error = %e, "Demo order failed"),
        }
    }

    info!(stats = ?gateway.breaker().stats(), "Demo finished");
    let _ = shutdown_tx.send(());
    listener.await.context("Confirmation listener panicked")?;
    Ok(())
}
