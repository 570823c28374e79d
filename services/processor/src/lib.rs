//! # Order Processor
//!
//! Consumes orders from the broker, applies them to an in-memory stock ledger
//! under simulated latency and faults, and replies with confirmations.
//!
//! - [`ledger`]: per-item stock with atomic check-and-decrement
//! - [`processor`]: the per-order algorithm and its chaos settings
//! - [`consumer`]: the subscription loop
//! - [`config`]: environment configuration

pub mod config;
pub mod consumer;
pub mod ledger;
pub mod processor;

pub use config::{ConfigError, ProcessorConfig};
pub use consumer::OrderConsumer;
pub use ledger::{LedgerError, StockLedger};
pub use processor::{ChaosConfig, ChaosConfigError, OrderProcessor, ProcessOutcome};
