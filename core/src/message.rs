//! Message types exchanged between the gateway and the processor.
//!
//! Every message crosses the bus as an [`Envelope`]: a stable type tag plus a JSON
//! payload. JSON keeps the payloads readable by non-Rust consumers of the same
//! queues, while the type tag lets a subscriber reject a payload meant for
//! someone else before trying to decode it.
//!
//! # Example
//!
//! ```
//! use stockflow_core::message::{CorrelationId, Message, Order};
//!
//! let order = Order::new(CorrelationId::new(), "item1", 5);
//! let envelope = order.to_envelope()?;
//! assert_eq!(envelope.message_type, "Order.v1");
//!
//! let decoded = Order::from_envelope(&envelope)?;
//! assert_eq!(decoded, order);
//! # Ok::<(), stockflow_core::message::MessageError>(())
//! ```

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Error types for message encoding.
#[derive(Error, Debug)]
pub enum MessageError {
    /// Failed to serialize a message payload.
    #[error("Failed to serialize message: {0}")]
    SerializationError(String),

    /// Failed to deserialize a message payload.
    #[error("Failed to deserialize message: {0}")]
    DeserializationError(String),

    /// The envelope carries a different message type than the one requested.
    #[error("Unexpected message type: expected {expected}, got {actual}")]
    UnexpectedType {
        /// Type tag the caller asked for
        expected: &'static str,
        /// Type tag found on the envelope
        actual: String,
    },
}

/// Unique token linking an outbound order to its eventual confirmation.
///
/// Generated once per submission. Two concurrent orders for the same item always
/// carry different correlation IDs, so one can never resolve the other's pending
/// request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a new random correlation ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A message as it travels on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Stable, versioned type tag (e.g. `"Order.v1"`)
    pub message_type: String,
    /// Encoded message body
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Create a new envelope.
    #[must_use]
    pub const fn new(message_type: String, payload: Vec<u8>) -> Self {
        Self {
            message_type,
            payload,
        }
    }
}

/// A typed message that can be carried in an [`Envelope`].
///
/// The default methods work for any type implementing `Serialize` and
/// `DeserializeOwned`; implementors only supply the type tag.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Type tag used on the wire. Include a version suffix.
    const MESSAGE_TYPE: &'static str;

    /// Returns the type tag of this message.
    fn message_type(&self) -> &'static str {
        Self::MESSAGE_TYPE
    }

    /// Encode this message into an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::SerializationError`] if the payload cannot be encoded.
    fn to_envelope(&self) -> Result<Envelope, MessageError> {
        let payload = serde_json::to_vec(self)
            .map_err(|e| MessageError::SerializationError(e.to_string()))?;
        Ok(Envelope::new(Self::MESSAGE_TYPE.to_string(), payload))
    }

    /// Decode a message from an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::UnexpectedType`] if the envelope is tagged with
    /// another type, or [`MessageError::DeserializationError`] if the payload
    /// is malformed.
    fn from_envelope(envelope: &Envelope) -> Result<Self, MessageError> {
        if envelope.message_type != Self::MESSAGE_TYPE {
            return Err(MessageError::UnexpectedType {
                expected: Self::MESSAGE_TYPE,
                actual: envelope.message_type.clone(),
            });
        }
        serde_json::from_slice(&envelope.payload)
            .map_err(|e| MessageError::DeserializationError(e.to_string()))
    }
}

/// Request to take `quantity` units of `item_id` out of stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Unique per submission
    pub correlation_id: CorrelationId,
    /// Item to take from stock
    pub item_id: String,
    /// Units requested (positive)
    pub quantity: u32,
}

impl Order {
    /// Create a new order.
    #[must_use]
    pub fn new(correlation_id: CorrelationId, item_id: impl Into<String>, quantity: u32) -> Self {
        Self {
            correlation_id,
            item_id: item_id.into(),
            quantity,
        }
    }

    /// Whether the order can be applied at all: a named item and a positive quantity.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        !self.item_id.is_empty() && self.quantity > 0
    }
}

impl Message for Order {
    const MESSAGE_TYPE: &'static str = "Order.v1";
}

/// Outcome of an order, emitted by the processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    /// Correlation ID copied from the order
    pub correlation_id: CorrelationId,
    /// Item the order referred to
    pub item_id: String,
    /// Whether stock was taken
    pub success: bool,
    /// Stock left after the order (unchanged on failure, 0 for unknown items)
    pub remaining_stock: u32,
}

impl Confirmation {
    /// Confirmation for an order that was applied.
    #[must_use]
    pub fn accepted(order: &Order, remaining_stock: u32) -> Self {
        Self {
            correlation_id: order.correlation_id,
            item_id: order.item_id.clone(),
            success: true,
            remaining_stock,
        }
    }

    /// Confirmation for an order that was declined.
    #[must_use]
    pub fn declined(order: &Order, remaining_stock: u32) -> Self {
        Self {
            correlation_id: order.correlation_id,
            item_id: order.item_id.clone(),
            success: false,
            remaining_stock,
        }
    }
}

impl Message for Confirmation {
    const MESSAGE_TYPE: &'static str = "Confirmation.v1";
}

/// Best-effort availability broadcast for passive cache warmers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockUpdate {
    /// Item whose availability changed
    pub item_id: String,
    /// Whether any stock is left
    pub available: bool,
}

impl Message for StockUpdate {
    const MESSAGE_TYPE: &'static str = "StockUpdate.v1";
}
