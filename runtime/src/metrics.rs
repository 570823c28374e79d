//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for the resilience core:
//! - Circuit breaker state and outcomes
//! - Pending request registry size and resolution paths
//! - Message bus publish/consume
//! - Order outcomes on both sides of the bus
//!
//! Recording is always safe: without an installed exporter the `metrics` facade
//! discards values.
//!
//! # Example
//!
//! ```rust,no_run
//! use stockflow_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

use crate::circuit_breaker::CircuitState;

// Re-export metrics macros for use in other crates
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the exporter and start its HTTP listener.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed. A recorder
    /// that is already installed is tolerated with a warning.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;
        let handle = recorder.handle();

        match metrics::set_global_recorder(recorder) {
            Ok(()) => {
                let addr = self.addr;
                tokio::spawn(async move {
                    if exporter.await.is_err() {
                        tracing::error!(addr = %addr, "Metrics exporter stopped");
                    }
                });
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Circuit Breaker Metrics
    describe_gauge!(
        "circuit_breaker_state",
        "Current circuit breaker state (0=closed, 1=half-open, 2=open)"
    );
    describe_counter!(
        "circuit_breaker_transitions_total",
        "State transitions, labelled by from/to"
    );
    describe_counter!(
        "circuit_breaker_rejections_total",
        "Calls rejected while the circuit was open"
    );
    describe_counter!(
        "circuit_breaker_successes_total",
        "Outcomes recorded as success"
    );
    describe_counter!(
        "circuit_breaker_failures_total",
        "Outcomes recorded as failure"
    );

    // Pending Request Metrics
    describe_gauge!("pending_requests", "Requests awaiting a reply");
    describe_counter!(
        "pending_requests_registered_total",
        "Requests registered for a reply"
    );
    describe_counter!(
        "pending_requests_resolved_total",
        "Requests completed by a reply"
    );
    describe_counter!(
        "pending_requests_expired_total",
        "Requests completed by their deadline"
    );
    describe_counter!(
        "pending_requests_cancelled_total",
        "Requests removed without completion"
    );
    describe_counter!(
        "pending_requests_late_replies_total",
        "Replies that found no pending request"
    );

    // Message Bus Metrics
    describe_counter!(
        "message_bus_messages_published_total",
        "Total number of messages published"
    );
    describe_counter!(
        "message_bus_messages_consumed_total",
        "Total number of messages consumed"
    );
    describe_counter!(
        "message_bus_publish_errors_total",
        "Total number of publish errors"
    );
    describe_counter!(
        "message_bus_consume_errors_total",
        "Total number of consume errors"
    );
    describe_histogram!(
        "message_bus_publish_duration_seconds",
        "Time taken to publish messages"
    );

    // Order Metrics
    describe_counter!(
        "orders_submitted_total",
        "Gateway submissions, labelled by outcome"
    );
    describe_counter!(
        "orders_processed_total",
        "Processor results, labelled by outcome"
    );
}

/// Circuit breaker metrics recorder.
pub struct CircuitBreakerMetrics;

impl CircuitBreakerMetrics {
    /// Record circuit breaker state.
    pub fn record_state(state: CircuitState) {
        gauge!("circuit_breaker_state").set(state.as_gauge());
    }

    /// Record a state transition.
    pub fn record_transition(from: &'static str, to: &'static str) {
        counter!("circuit_breaker_transitions_total", "from" => from, "to" => to).increment(1);
    }

    /// Record a rejected call (circuit open).
    pub fn record_rejection() {
        counter!("circuit_breaker_rejections_total").increment(1);
    }

    /// Record a successful call.
    pub fn record_success() {
        counter!("circuit_breaker_successes_total").increment(1);
    }

    /// Record a failed call.
    pub fn record_failure() {
        counter!("circuit_breaker_failures_total").increment(1);
    }
}

/// Pending request registry metrics recorder.
pub struct PendingRequestMetrics;

impl PendingRequestMetrics {
    // Registry sizes stay far below 2^53, so the f64 gauge is exact.
    #[allow(clippy::cast_precision_loss)]
    fn record_size(pending: usize) {
        gauge!("pending_requests").set(pending as f64);
    }

    /// Record a registration.
    pub fn record_registered(pending: usize) {
        counter!("pending_requests_registered_total").increment(1);
        Self::record_size(pending);
    }

    /// Record a resolution by reply.
    pub fn record_resolved(pending: usize) {
        counter!("pending_requests_resolved_total").increment(1);
        Self::record_size(pending);
    }

    /// Record an expiry.
    pub fn record_expired(pending: usize) {
        counter!("pending_requests_expired_total").increment(1);
        Self::record_size(pending);
    }

    /// Record a cancellation.
    pub fn record_cancelled(pending: usize) {
        counter!("pending_requests_cancelled_total").increment(1);
        Self::record_size(pending);
    }

    /// Record a reply that arrived after its entry was gone.
    pub fn record_late() {
        counter!("pending_requests_late_replies_total").increment(1);
    }
}

/// Message bus metrics recorder.
pub struct MessageBusMetrics;

impl MessageBusMetrics {
    /// Record a message publish.
    pub fn record_publish(duration: Duration) {
        counter!("message_bus_messages_published_total").increment(1);
        histogram!("message_bus_publish_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a message consumption.
    pub fn record_consume() {
        counter!("message_bus_messages_consumed_total").increment(1);
    }

    /// Record a publish error.
    pub fn record_publish_error() {
        counter!("message_bus_publish_errors_total").increment(1);
    }

    /// Record a consume error.
    pub fn record_consume_error() {
        counter!("message_bus_consume_errors_total").increment(1);
    }
}

/// Order outcome metrics recorder.
pub struct OrderMetrics;

impl OrderMetrics {
    /// Record the outcome of a gateway submission.
    pub fn record_submission(outcome: &'static str) {
        counter!("orders_submitted_total", "outcome" => outcome).increment(1);
    }

    /// Record what the processor did with an order.
    pub fn record_processed(outcome: &'static str) {
        counter!("orders_processed_total", "outcome" => outcome).increment(1);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Test code

    use super::*;

    #[test]
    fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.render().is_none());
    }

    #[tokio::test]
    async fn test_metrics_server_render() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        CircuitBreakerMetrics::record_state(CircuitState::Open);
        CircuitBreakerMetrics::record_rejection();
        PendingRequestMetrics::record_registered(1);
        MessageBusMetrics::record_publish(Duration::from_millis(5));

        // Another test may have installed the recorder first; values are still
        // recorded, there is just no handle here to render them.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("circuit_breaker_state"));
            assert!(rendered.contains("pending_requests_registered_total"));
            assert!(rendered.contains("message_bus_messages_published_total"));
        }
    }
}
