//! Message bus abstraction between the gateway and the processor.
//!
//! This module provides the [`MessageBus`] trait for publishing [`Envelope`]s to a
//! named destination and subscribing to a stream of them. The gateway publishes
//! orders and listens for confirmations; the processor does the opposite.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   Order    ┌─────────────────┐
//! │ OrderGateway │──────────► │ inventory_queue │
//! └──────▲───────┘            └────────┬────────┘
//!        │                             │
//!        │                             ▼
//! ┌──────┴───────┐ Confirmation ┌────────────────┐
//! │ cart_updates │◄─────────────│ OrderProcessor │
//! └──────────────┘              └───────┬────────┘
//!                                       │ StockUpdate
//!                                       ▼
//!                               ┌────────────────┐
//!                               │ stock_exchange │
//!                               └────────────────┘
//! ```
//!
//! # Key Principles
//!
//! - **Transport errors are typed**: every publish or consume failure surfaces as a
//!   [`MessageBusError`]; nothing is dropped silently
//! - **No retries here**: reconnection policy belongs to the caller
//! - **Topology is external**: destinations are declared by whoever runs the broker
//!
//! # Implementations
//!
//! - `InMemoryMessageBus` in `stockflow-testing` - for tests
//! - `RedpandaMessageBus` in `stockflow-redpanda` - Kafka-compatible, for production

use crate::message::Envelope;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during message bus operations.
#[derive(Error, Debug, Clone)]
pub enum MessageBusError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a destination
    #[error("Publish failed for destination '{destination}': {reason}")]
    PublishFailed {
        /// The destination that failed
        destination: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to destinations
    #[error("Subscription failed for destinations {destinations:?}: {reason}")]
    SubscriptionFailed {
        /// The destinations that failed to subscribe
        destinations: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// A delivered message could not be decoded into an envelope
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Network or transport error while consuming
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Stream of envelopes from a subscription.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Envelope, MessageBusError>> + Send>>;

/// Trait for message bus implementations.
///
/// # Dyn Compatibility
///
/// Methods return explicit `Pin<Box<dyn Future>>` instead of using `async fn` so
/// that services can hold an `Arc<dyn MessageBus>` and be tested against an
/// in-memory bus.
pub trait MessageBus: Send + Sync {
    /// Publish an envelope to a destination.
    ///
    /// # Errors
    ///
    /// Returns [`MessageBusError::PublishFailed`] if the broker did not accept the
    /// message.
    fn publish(
        &self,
        destination: &str,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), MessageBusError>> + Send + '_>>;

    /// Subscribe to one or more destinations.
    ///
    /// When the returned future resolves the subscription is registered, but
    /// whether envelopes published before partitions are assigned reach the
    /// stream is up to the backend. The in-memory bus delivers everything
    /// published after this point. A broker-backed bus may still be joining
    /// its consumer group; its offset-reset policy decides whether those
    /// envelopes are read from the start of the log or skipped.
    ///
    /// # Errors
    ///
    /// Returns [`MessageBusError::SubscriptionFailed`] if the subscription could
    /// not be established.
    fn subscribe(
        &self,
        destinations: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, MessageBusError>> + Send + '_>>;
}
