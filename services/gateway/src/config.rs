//! Configuration management for the order gateway.
//!
//! Loads configuration from environment variables with sensible defaults. A
//! variable that is set but cannot be parsed is an error rather than a silent
//! fallback.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use stockflow_core::config::{InvalidValue, parse_choice, parse_value, parse_var};
use stockflow_core::topology::Topology;
use stockflow_runtime::CircuitBreakerConfig;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A variable is set but its value is not usable.
    #[error(transparent)]
    InvalidValue(#[from] InvalidValue),
}

/// One order the demo driver submits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoOrder {
    /// Item to order
    pub item_id: String,
    /// Requested quantity, passed to the gateway unvalidated
    pub quantity: i64,
}

/// Gateway configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Broker addresses (comma-separated)
    pub brokers: String,
    /// Consumer group for the confirmation listener
    pub consumer_group: String,
    /// Where a new consumer group starts reading the confirmations destination
    pub auto_offset_reset: String,
    /// Destination names
    pub topology: Topology,
    /// Reply deadline per submission
    pub order_deadline: Duration,
    /// Breaker thresholds
    pub breaker: CircuitBreakerConfig,
    /// Prometheus listener address, if metrics are enabled
    pub metrics_addr: Option<SocketAddr>,
    /// Orders submitted by the demo driver
    pub demo_orders: Vec<DemoOrder>,
}

impl GatewayConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to an unusable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to an unusable value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Topology::default();
        let breaker = CircuitBreakerConfig::builder()
            .failure_threshold(parse_var(&lookup, "BREAKER_FAILURE_THRESHOLD", 3)?)
            .reset_timeout(Duration::from_millis(parse_var(
                &lookup,
                "BREAKER_RESET_TIMEOUT_MS",
                10_000,
            )?))
            .half_open_successes_required(parse_var(&lookup, "BREAKER_HALF_OPEN_SUCCESSES", 2)?)
            .build();

        Ok(Self {
            brokers: lookup("REDPANDA_BROKERS").unwrap_or_else(|| "localhost:9092".to_string()),
            consumer_group: lookup("CONSUMER_GROUP").unwrap_or_else(|| "order-gateway".to_string()),
            auto_offset_reset: parse_choice(&lookup, "AUTO_OFFSET_RESET", "earliest", &["earliest", "latest"])?,
            topology: Topology {
                orders: lookup("ORDERS_QUEUE").unwrap_or(defaults.orders),
                confirmations: lookup("CONFIRMATIONS_QUEUE").unwrap_or(defaults.confirmations),
                stock_updates: lookup("STOCK_UPDATES_TOPIC").unwrap_or(defaults.stock_updates),
            },
            order_deadline: Duration::from_millis(parse_var(&lookup, "ORDER_DEADLINE_MS", 5000)?),
            breaker,
            metrics_addr: lookup("METRICS_ADDR")
                .map(|raw| parse_value("METRICS_ADDR", &raw))
                .transpose()?,
            demo_orders: match lookup("DEMO_ORDERS") {
                Some(raw) => parse_demo_orders(&raw)?,
                None => vec![
                    DemoOrder { item_id: "item1".to_string(), quantity: 5 },
                    DemoOrder { item_id: "item2".to_string(), quantity: 1 },
                ],
            },
        })
    }
}

/// Parse `item1:5,item2:1` into demo orders.
fn parse_demo_orders(raw: &str) -> Result<Vec<DemoOrder>, InvalidValue> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let invalid =
                |reason: &str| InvalidValue::new("DEMO_ORDERS", raw, format!("{reason} in entry {entry:?}"));
            let (item_id, quantity) = entry.split_once(':').ok_or_else(|| invalid("missing ':'"))?;
            let quantity = quantity
                .trim()
                .parse()
                .map_err(|_| invalid("quantity is not an integer"))?;
            Ok(DemoOrder {
                item_id: item_id.trim().to_string(),
                quantity,
            })
        })
        .collect()
}
