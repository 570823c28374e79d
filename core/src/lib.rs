//! # Stockflow Core
//!
//! Shared vocabulary for the order gateway and the order processor.
//!
//! - [`message`]: `Order`, `Confirmation`, `StockUpdate` and their envelope encoding
//! - [`message_bus`]: the transport trait both services talk through
//! - [`topology`]: names of the destinations on the broker
//! - [`environment`]: injected dependencies such as the clock
//! - [`config`]: environment-variable parsing helpers

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Environment-variable parsing helpers
pub mod config;

/// Message types and envelope encoding
pub mod message;

/// Message bus abstraction
pub mod message_bus;

pub use message::{Confirmation, CorrelationId, Envelope, Message, MessageError, Order, StockUpdate};
pub use message_bus::{MessageBus, MessageBusError, MessageStream};

/// Broker destinations used by the services.
///
/// Declaring these queues and topics on the broker is done outside this
/// workspace; the services only need their names.
pub mod topology {
    /// Names of the three destinations.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Topology {
        /// Durable queue carrying `Order` messages
        pub orders: String,
        /// Durable queue carrying `Confirmation` messages
        pub confirmations: String,
        /// Best-effort broadcast topic carrying `StockUpdate` messages
        pub stock_updates: String,
    }

    impl Default for Topology {
        fn default() -> Self {
            Self {
                orders: "inventory_queue".to_string(),
                confirmations: "cart_updates".to_string(),
                stock_updates: "stock_exchange".to_string(),
            }
        }
    }
}

pub use topology::Topology;

/// Environment module - Dependency injection traits
///
/// All time reads go through [`Clock`](environment::Clock) so that time-dependent
/// state machines can be driven deterministically in tests.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use stockflow_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let earlier = clock.now();
    /// assert!(clock.now() >= earlier);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_topology_matches_broker_names() {
        let topology = Topology::default();
        assert_eq!(topology.orders, "inventory_queue");
        assert_eq!(topology.confirmations, "cart_updates");
        assert_eq!(topology.stock_updates, "stock_exchange");
    }
}
