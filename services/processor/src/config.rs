//! Configuration management for the order processor.
//!
//! Loads configuration from environment variables with sensible defaults. A
//! variable that is set but cannot be parsed is an error rather than a silent
//! fallback.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use stockflow_core::config::{InvalidValue, parse_choice, parse_value, parse_var};
use stockflow_core::topology::Topology;
use thiserror::Error;

use crate::processor::{ChaosConfig, ChaosConfigError};

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A variable is set but its value is not usable.
    #[error(transparent)]
    InvalidValue(#[from] InvalidValue),

    /// The chaos settings are inconsistent.
    #[error("Invalid chaos settings: {0}")]
    Chaos(#[from] ChaosConfigError),
}

/// Processor configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Broker addresses (comma-separated)
    pub brokers: String,
    /// Consumer group shared by processor instances
    pub consumer_group: String,
    /// Where a new consumer group starts reading the orders destination
    pub auto_offset_reset: String,
    /// Destination names
    pub topology: Topology,
    /// Simulated latency and faults
    pub chaos: ChaosConfig,
    /// Stock the ledger starts with
    pub initial_stock: Vec<(String, u32)>,
    /// Prometheus listener address, if metrics are enabled
    pub metrics_addr: Option<SocketAddr>,
}

impl ProcessorConfig {
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
        let chaos = ChaosConfig::new(
            Duration::from_millis(parse_var(&lookup, "PROCESSOR_MIN_DELAY_MS", 0)?),
            Duration::from_millis(parse_var(&lookup, "PROCESSOR_MAX_DELAY_MS", 3000)?),
            parse_var(&lookup, "PROCESSOR_FAILURE_PROBABILITY", 0.2)?,
        )?;

        Ok(Self {
            brokers: lookup("REDPANDA_BROKERS").unwrap_or_else(|| "localhost:9092".to_string()),
            consumer_group: lookup("CONSUMER_GROUP").unwrap_or_else(|| "order-processor".to_string()),
            auto_offset_reset: parse_choice(&lookup, "AUTO_OFFSET_RESET", "earliest", &["earliest", "latest"])?,
            topology: Topology {
                orders: lookup("ORDERS_QUEUE").unwrap_or(defaults.orders),
                confirmations: lookup("CONFIRMATIONS_QUEUE").unwrap_or(defaults.confirmations),
                stock_updates: lookup("STOCK_UPDATES_TOPIC").unwrap_or(defaults.stock_updates),
            },
            chaos,
            initial_stock: match lookup("INITIAL_STOCK") {
                Some(raw) => parse_stock(&raw)?,
                None => vec![("item1".to_string(), 10), ("item2".to_string(), 0)],
            },
            metrics_addr: lookup("METRICS_ADDR")
                .map(|raw| parse_value("METRICS_ADDR", &raw))
                .transpose()?,
        })
    }
}

/// Parse `item1=10,item2=0` into ledger seed entries.
fn parse_stock(raw: &str) -> Result<Vec<(String, u32)>, InvalidValue> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let invalid =
                |reason: &str| InvalidValue::new("INITIAL_STOCK", raw, format!("{reason} in entry {entry:?}"));
            let (item_id, quantity) = entry.split_once('=').ok_or_else(|| invalid("missing '='"))?;
            let item_id = item_id.trim();
            if item_id.is_empty() {
                return Err(invalid("empty item id"));
            }
            let quantity = quantity
                .trim()
                .parse::<u32>()
                .map_err(|_| invalid("quantity is not a non-negative integer"))?;
            Ok((item_id.to_string(), quantity))
        })
        .collect()
}
