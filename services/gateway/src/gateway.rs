//! Order submission with admission control and bounded-latency replies.
//!
//! [`OrderGateway::submit`] turns the one-way order queue into a request/reply
//! call:
//!
//! 1. Validate the request (no messaging on failure)
//! 2. Ask the [`CircuitBreaker`]; when it refuses, return
//!    [`SubmitOutcome::Unavailable`] at once
//! 3. Register a pending entry under a fresh [`CorrelationId`]
//! 4. Publish the [`Order`]
//! 5. Wait until the confirmation listener resolves the entry or its deadline
//!    expires it
//!
//! The entry's completion handler feeds the breaker: a successful confirmation
//! is a success, a declined confirmation or a timeout is a failure.
//!
//! # Example
//!
//! ```no_run
//! use order_gateway::gateway::{OrderGateway, SubmitOutcome};
//! use stockflow_core::message_bus::MessageBus;
//! use stockflow_core::topology::Topology;
//! use stockflow_runtime::{CircuitBreaker, CircuitBreakerConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example(bus: Arc<dyn MessageBus>) -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = OrderGateway::new(
//!     bus,
//!     CircuitBreaker::new(CircuitBreakerConfig::default()),
//!     &Topology::default(),
//!     Duration::from_secs(5),
//! );
//!
//! match gateway.submit("item1", 5).await? {
//!     SubmitOutcome::Accepted { remaining_stock } => println!("{remaining_stock} left"),
//!     other => println!("not placed: {other:?}"),
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;
use stockflow_core::message::{Confirmation, CorrelationId, Message, Order};
use stockflow_core::message_bus::{MessageBus, MessageBusError};
use stockflow_core::topology::Topology;
use stockflow_runtime::metrics::OrderMetrics;
use stockflow_runtime::{CircuitBreaker, PendingRequestRegistry, RegistryError, Resolution};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Why a confirmed order was not placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Not enough stock (or the item is not stocked at all).
    OutOfStock,
}

/// Typed result of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Stock was taken.
    Accepted {
        /// Stock left after this order
        remaining_stock: u32,
    },
    /// The processor declined the order.
    Rejected {
        /// Reason for declining
        reason: RejectReason,
        /// Stock at the time of the decision
        remaining_stock: u32,
    },
    /// The circuit is open; nothing was sent.
    Unavailable,
    /// No confirmation arrived before the deadline.
    TimedOut,
}

impl SubmitOutcome {
    const fn metric_label(&self) -> &'static str {
        match self {
            Self::Accepted { .. } => "accepted",
            Self::Rejected { .. } => "rejected",
            Self::Unavailable => "unavailable",
            Self::TimedOut => "timed_out",
        }
    }
}

/// Errors that are not order outcomes.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Malformed request; nothing was sent.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The generated correlation ID is already pending.
    #[error(transparent)]
    DuplicateCorrelation(#[from] RegistryError),

    /// The order could not be handed to the broker.
    #[error("Transport error: {0}")]
    Transport(#[from] MessageBusError),
}

/// Client side of the order queue.
///
/// Cloning is cheap and clones share the breaker and the pending registry.
#[derive(Clone)]
pub struct OrderGateway {
    bus: Arc<dyn MessageBus>,
    breaker: CircuitBreaker,
    pending: PendingRequestRegistry<CorrelationId, Confirmation>,
    orders_destination: String,
    deadline: Duration,
}

impl std::fmt::Debug for OrderGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderGateway")
            .field("breaker", &self.breaker)
            .field("pending", &self.pending)
            .field("orders_destination", &self.orders_destination)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl OrderGateway {
    /// Create a gateway publishing to `topology.orders`.
    ///
    /// `deadline` is the reply deadline used by [`submit`](Self::submit).
    #[must_use]
    pub fn new(
        bus: Arc<dyn MessageBus>,
        breaker: CircuitBreaker,
        topology: &Topology,
        deadline: Duration,
    ) -> Self {
        Self {
            bus,
            breaker,
            pending: PendingRequestRegistry::new(),
            orders_destination: topology.orders.clone(),
            deadline,
        }
    }

    /// The breaker guarding the processor.
    #[must_use]
    pub const fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// The registry confirmations are resolved against.
    #[must_use]
    pub const fn registry(&self) -> &PendingRequestRegistry<CorrelationId, Confirmation> {
        &self.pending
    }

    /// Number of submissions still waiting for a reply.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// The configured reply deadline.
    #[must_use]
    pub const fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Submit an order using the configured deadline.
    ///
    /// # Errors
    ///
    /// See [`submit_with_deadline`](Self::submit_with_deadline).
    pub async fn submit(&self, item_id: &str, quantity: i64) -> Result<SubmitOutcome, GatewayError> {
        self.submit_with_deadline(item_id, quantity, self.deadline).await
    }

    /// Submit an order and wait at most `deadline` for its confirmation.
    ///
    /// Declines, timeouts and an open circuit are outcomes, not errors.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::InvalidRequest`] for an empty item or a non-positive quantity
    /// - [`GatewayError::DuplicateCorrelation`] if the correlation ID collides
    /// - [`GatewayError::Transport`] if the order cannot be published; this also
    ///   counts as a breaker failure
    pub async fn submit_with_deadline(
        &self,
        item_id: &str,
        quantity: i64,
        deadline: Duration,
    ) -> Result<SubmitOutcome, GatewayError> {
        let order = Self::validate(item_id, quantity)?;
        let envelope = order.to_envelope().map_err(|e| MessageBusError::PublishFailed {
            destination: self.orders_destination.clone(),
            reason: e.to_string(),
        })?;

        if !self.breaker.allow() {
            info!(item_id, quantity, "Circuit open, rejecting order");
            OrderMetrics::record_submission("unavailable");
            return Ok(SubmitOutcome::Unavailable);
        }

        let correlation_id = order.correlation_id;
        let (tx, rx) = oneshot::channel();
        let breaker = self.breaker.clone();
        self.pending.register(
            correlation_id,
            move |resolution: Resolution<Confirmation>| {
                match &resolution {
                    Resolution::Resolved(confirmation) if confirmation.success => breaker.record_success(),
                    Resolution::Resolved(_) | Resolution::TimedOut => breaker.record_failure(),
                }
                let _ = tx.send(resolution);
            },
            deadline,
        )?;

        if let Err(e) = self.bus.publish(&self.orders_destination, &envelope).await {
            self.pending.cancel(&correlation_id);
            self.breaker.record_failure();
            warn!(%correlation_id, item_id, error = %e, "Failed to publish order");
            OrderMetrics::record_submission("transport_error");
            return Err(GatewayError::Transport(e));
        }
        debug!(%correlation_id, item_id, quantity, ?deadline, "Order published");

        let outcome = match rx.await {
            Ok(Resolution::Resolved(confirmation)) if confirmation.success => SubmitOutcome::Accepted {
                remaining_stock: confirmation.remaining_stock,
            },
            Ok(Resolution::Resolved(confirmation)) => SubmitOutcome::Rejected {
                reason: RejectReason::OutOfStock,
                remaining_stock: confirmation.remaining_stock,
            },
            Ok(Resolution::TimedOut) | Err(_) => SubmitOutcome::TimedOut,
        };

        info!(%correlation_id, item_id, quantity, outcome = ?outcome, "Order completed");
        OrderMetrics::record_submission(outcome.metric_label());
        Ok(outcome)
    }

    fn validate(item_id: &str, quantity: i64) -> Result<Order, GatewayError> {
        let item_id = item_id.trim();
        if item_id.is_empty() {
            return Err(GatewayError::InvalidRequest("item id is empty".to_string()));
        }
        let quantity = u32::try_from(quantity)
            .ok()
            .filter(|quantity| *quantity > 0)
            .ok_or_else(|| {
                GatewayError::InvalidRequest(format!("quantity must be a positive integer, got {quantity}"))
            })?;
        Ok(Order::new(CorrelationId::new(), item_id, quantity))
    }
}
