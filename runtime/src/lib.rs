//! # Stockflow Runtime
//!
//! Resilience building blocks shared by the order gateway and processor.
//!
//! - [`circuit_breaker`]: three-state admission control for a protected dependency
//! - [`pending`]: correlation registry with one-shot completion and expiry
//! - [`metrics`]: Prometheus recorders and exporter
//!
//! ## Example
//!
//! ```rust
//! use stockflow_runtime::{CircuitBreaker, CircuitBreakerConfig, PendingRequestRegistry};
//!
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
//! let registry: PendingRequestRegistry<String, bool> = PendingRequestRegistry::new();
//!
//! assert!(breaker.allow());
//! assert!(registry.is_empty());
//! ```

/// Circuit breaker pattern for protecting callers from a degraded dependency
pub mod circuit_breaker;

/// Correlation registry for request/reply over one-way messaging
pub mod pending;

/// Prometheus metrics for observability
pub mod metrics;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerStats, CircuitState,
};
pub use pending::{PendingHandle, PendingRequestRegistry, RegistryError, Resolution};
