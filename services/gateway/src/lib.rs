//! # Order Gateway
//!
//! Accepts order requests, protects the processor behind a circuit breaker, and
//! turns the one-way order queue into a request/reply call with a deadline.
//!
//! - [`gateway`]: submission, admission control and outcome mapping
//! - [`listener`]: routes confirmations to pending submissions
//! - [`config`]: environment configuration

pub mod config;
pub mod gateway;
pub mod listener;

pub use config::{ConfigError, DemoOrder, GatewayConfig};
pub use gateway::{GatewayError, OrderGateway, RejectReason, SubmitOutcome};
pub use listener::ConfirmationListener;
