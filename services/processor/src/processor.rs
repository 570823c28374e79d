//! Order processing with simulated latency and fault injection.
//!
//! [`OrderProcessor::consume`] models a backend that is sometimes slow and
//! sometimes silently drops work:
//!
//! 1. Wait a random delay drawn from the [`ChaosConfig`] range
//! 2. With the configured probability, drop the order without replying
//! 3. Otherwise apply it to the [`StockLedger`] and publish a [`Confirmation`]
//!
//! A dropped order is still acknowledged to the broker; the gateway only ever
//! sees it as a timeout.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use stockflow_core::message::{Confirmation, Message, Order, StockUpdate};
use stockflow_core::message_bus::{MessageBus, MessageBusError};
use stockflow_core::topology::Topology;
use stockflow_runtime::metrics::OrderMetrics;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ledger::{LedgerError, StockLedger};

/// Invalid chaos settings.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChaosConfigError {
    /// Failure probability outside `[0, 1]`.
    #[error("Failure probability must be within [0, 1], got {0}")]
    InvalidProbability(f64),

    /// Minimum delay above maximum delay.
    #[error("Minimum delay {min:?} exceeds maximum delay {max:?}")]
    InvertedDelayRange {
        /// Configured minimum
        min: Duration,
        /// Configured maximum
        max: Duration,
    },
}

/// Simulated latency and fault settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChaosConfig {
    min_delay: Duration,
    max_delay: Duration,
    failure_probability: f64,
}

impl ChaosConfig {
    /// Create a validated chaos configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ChaosConfigError`] if the probability is outside `[0, 1]` (or NaN)
    /// or `min_delay > max_delay`.
    pub fn new(
        min_delay: Duration,
        max_delay: Duration,
        failure_probability: f64,
    ) -> Result<Self, ChaosConfigError> {
        if !(0.0..=1.0).contains(&failure_probability) {
            return Err(ChaosConfigError::InvalidProbability(failure_probability));
        }
        if min_delay > max_delay {
            return Err(ChaosConfigError::InvertedDelayRange {
                min: min_delay,
                max: max_delay,
            });
        }
        Ok(Self {
            min_delay,
            max_delay,
            failure_probability,
        })
    }

    /// No delay, no injected faults.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            failure_probability: 0.0,
        }
    }

    /// Lower bound of the simulated delay.
    #[must_use]
    pub const fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Upper bound of the simulated delay.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Probability that an order is dropped without a reply.
    #[must_use]
    pub const fn failure_probability(&self) -> f64 {
        self.failure_probability
    }

    fn sample_delay<R: Rng>(&self, rng: &mut R) -> Duration {
        if self.min_delay == self.max_delay {
            return self.min_delay;
        }
        rng.gen_range(self.min_delay..=self.max_delay)
    }

    fn roll_fault<R: Rng>(&self, rng: &mut R) -> bool {
        rng.gen_bool(self.failure_probability)
    }
}

impl Default for ChaosConfig {
    /// Up to three seconds of delay and a one-in-five fault rate.
    fn default() -> Self {
        Self {
            min_delay: Duration::ZERO,
            max_delay: Duration::from_secs(3),
            failure_probability: 0.2,
        }
    }
}

/// What happened to a consumed order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// A confirmation was published (successful or declined).
    Confirmed(Confirmation),
    /// The simulated fault fired; nothing was published.
    FaultInjected,
    /// The order was structurally invalid and ignored.
    Discarded,
}

/// Applies orders to a stock ledger and replies with confirmations.
pub struct OrderProcessor {
    ledger: StockLedger,
    bus: Arc<dyn MessageBus>,
    topology: Topology,
    chaos: ChaosConfig,
}

impl OrderProcessor {
    /// Create a processor.
    #[must_use]
    pub fn new(
        ledger: StockLedger,
        bus: Arc<dyn MessageBus>,
        topology: Topology,
        chaos: ChaosConfig,
    ) -> Self {
        Self {
            ledger,
            bus,
            topology,
            chaos,
        }
    }

    /// The ledger this processor mutates.
    #[must_use]
    pub const fn ledger(&self) -> &StockLedger {
        &self.ledger
    }

    /// Process one order.
    ///
    /// # Errors
    ///
    /// Returns [`MessageBusError`] if the confirmation cannot be published. The
    /// ledger change, if any, has already been applied at that point.
    pub async fn consume(&self, order: &Order) -> Result<ProcessOutcome, MessageBusError> {
        if !order.is_well_formed() {
            warn!(
                correlation_id = %order.correlation_id,
                item_id = %order.item_id,
                quantity = order.quantity,
                "Discarding malformed order"
            );
            OrderMetrics::record_processed("discarded");
            return Ok(ProcessOutcome::Discarded);
        }

        let (delay, fault) = {
            let mut rng = rand::thread_rng();
            (self.chaos.sample_delay(&mut rng), self.chaos.roll_fault(&mut rng))
        };
        if !delay.is_zero() {
            debug!(correlation_id = %order.correlation_id, ?delay, "Simulating processing delay");
            tokio::time::sleep(delay).await;
        }

        if fault {
            warn!(
                correlation_id = %order.correlation_id,
                item_id = %order.item_id,
                "Simulated fault: dropping order without confirmation"
            );
            OrderMetrics::record_processed("fault");
            return Ok(ProcessOutcome::FaultInjected);
        }

        let (confirmation, known_item) = match self.ledger.decrement(&order.item_id, order.quantity) {
            Ok(remaining) => (Confirmation::accepted(order, remaining), true),
            Err(LedgerError::InsufficientStock { available, .. }) => {
                (Confirmation::declined(order, available), true)
            }
            Err(LedgerError::UnknownItem(_)) => (Confirmation::declined(order, 0), false),
        };

        self.publish(&self.topology.confirmations, &confirmation).await?;
        info!(
            correlation_id = %order.correlation_id,
            item_id = %order.item_id,
            quantity = order.quantity,
            success = confirmation.success,
            remaining_stock = confirmation.remaining_stock,
            "Order processed"
        );
        OrderMetrics::record_processed(if confirmation.success { "confirmed" } else { "rejected" });

        if known_item {
            self.broadcast_stock(&confirmation).await;
        }

        Ok(ProcessOutcome::Confirmed(confirmation))
    }

    async fn broadcast_stock(&self, confirmation: &Confirmation) {
        let update = StockUpdate {
            item_id: confirmation.item_id.clone(),
            available: confirmation.remaining_stock > 0,
        };
        if let Err(e) = self.publish(&self.topology.stock_updates, &update).await {
            warn!(item_id = %update.item_id, error = %e, "Failed to broadcast stock update");
        }
    }

    async fn publish<M: Message>(&self, destination: &str, message: &M) -> Result<(), MessageBusError> {
        let envelope = message
            .to_envelope()
            .map_err(|e| MessageBusError::PublishFailed {
                destination: destination.to_string(),
                reason: e.to_string(),
            })?;
        self.bus.publish(destination, &envelope).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Test code

    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use stockflow_core::message::CorrelationId;
    use stockflow_testing::InMemoryMessageBus;

    fn processor(bus: &InMemoryMessageBus, ledger: StockLedger, chaos: ChaosConfig) -> OrderProcessor {
        OrderProcessor::new(ledger, Arc::new(bus.clone()), Topology::default(), chaos)
    }

    #[test]
    fn chaos_config_rejects_bad_probability() {
        assert_eq!(
            ChaosConfig::new(Duration::ZERO, Duration::ZERO, 1.5),
            Err(ChaosConfigError::InvalidProbability(1.5))
        );
        assert!(ChaosConfig::new(Duration::ZERO, Duration::ZERO, f64::NAN).is_err());
    }

    #[test]
    fn chaos_config_rejects_inverted_range() {
        let result = ChaosConfig::new(Duration::from_secs(2), Duration::from_secs(1), 0.0);
        assert!(matches!(result, Err(ChaosConfigError::InvertedDelayRange { .. })));
    }

    #[test]
    fn sampled_delay_stays_in_range() {
        let chaos = ChaosConfig::new(Duration::from_millis(10), Duration::from_millis(20), 0.0).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..100 {
            let delay = chaos.sample_delay(&mut rng);
            assert!(delay >= Duration::from_millis(10) && delay <= Duration::from_millis(20));
        }
    }

    #[test]
    fn certain_fault_always_fires() {
        let chaos = ChaosConfig::new(Duration::ZERO, Duration::ZERO, 1.0).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        assert!((0..20).all(|_| chaos.roll_fault(&mut rng)));
        assert!(!(0..20).any(|_| ChaosConfig::disabled().roll_fault(&mut rng)));
    }

    #[tokio::test]
    async fn accepted_order_confirms_and_broadcasts() {
        let bus = InMemoryMessageBus::new();
        let processor = processor(&bus, StockLedger::with_stock([("item1", 10)]), ChaosConfig::disabled());
        let order = Order::new(CorrelationId::new(), "item1", 5);

        let outcome = processor.consume(&order).await.unwrap();

        assert_eq!(outcome, ProcessOutcome::Confirmed(Confirmation::accepted(&order, 5)));
        assert_eq!(bus.decoded::<Confirmation>("cart_updates"), vec![Confirmation::accepted(&order, 5)]);
        assert_eq!(
            bus.decoded::<StockUpdate>("stock_exchange"),
            vec![StockUpdate { item_id: "item1".to_string(), available: true }]
        );
    }

    #[tokio::test]
    async fn insufficient_stock_declines_without_mutation() {
        let bus = InMemoryMessageBus::new();
        let processor = processor(&bus, StockLedger::with_stock([("item1", 5)]), ChaosConfig::disabled());
        let order = Order::new(CorrelationId::new(), "item1", 20);

        let outcome = processor.consume(&order).await.unwrap();

        assert_eq!(outcome, ProcessOutcome::Confirmed(Confirmation::declined(&order, 5)));
        assert_eq!(processor.ledger().quantity("item1"), Some(5));
    }

    #[tokio::test]
    async fn unknown_item_declines_with_zero_and_no_broadcast() {
        let bus = InMemoryMessageBus::new();
        let processor = processor(&bus, StockLedger::new(), ChaosConfig::disabled());
        let order = Order::new(CorrelationId::new(), "ghost", 1);

        let outcome = processor.consume(&order).await.unwrap();

        assert_eq!(outcome, ProcessOutcome::Confirmed(Confirmation::declined(&order, 0)));
        assert_eq!(bus.published_count("stock_exchange"), 0);
    }

    #[tokio::test]
    async fn injected_fault_publishes_nothing() {
        let bus = InMemoryMessageBus::new();
        let chaos = ChaosConfig::new(Duration::ZERO, Duration::ZERO, 1.0).unwrap();
        let processor = processor(&bus, StockLedger::with_stock([("item1", 10)]), chaos);

        let outcome = processor
            .consume(&Order::new(CorrelationId::new(), "item1", 1))
            .await
            .unwrap();

        assert_eq!(outcome, ProcessOutcome::FaultInjected);
        assert_eq!(bus.published_count("cart_updates"), 0);
        assert_eq!(processor.ledger().quantity("item1"), Some(10));
    }

    #[tokio::test]
    async fn malformed_order_is_discarded() {
        let bus = InMemoryMessageBus::new();
        let processor = processor(&bus, StockLedger::with_stock([("item1", 10)]), ChaosConfig::disabled());

        let zero = processor.consume(&Order::new(CorrelationId::new(), "item1", 0)).await.unwrap();
        let empty = processor.consume(&Order::new(CorrelationId::new(), "", 1)).await.unwrap();

        assert_eq!(zero, ProcessOutcome::Discarded);
        assert_eq!(empty, ProcessOutcome::Discarded);
        assert_eq!(bus.published_count("cart_updates"), 0);
    }

    #[tokio::test]
    async fn publish_failure_propagates() {
        let bus = InMemoryMessageBus::new();
        bus.fail_publishes(true);
        let processor = processor(&bus, StockLedger::with_stock([("item1", 10)]), ChaosConfig::disabled());

        let result = processor.consume(&Order::new(CorrelationId::new(), "item1", 1)).await;

        assert!(matches!(result, Err(MessageBusError::PublishFailed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_is_applied_before_processing() {
        let bus = InMemoryMessageBus::new();
        let chaos = ChaosConfig::new(Duration::from_secs(2), Duration::from_secs(2), 0.0).unwrap();
        let processor = processor(&bus, StockLedger::with_stock([("item1", 10)]), chaos);
        let started = tokio::time::Instant::now();

        processor
            .consume(&Order::new(CorrelationId::new(), "item1", 1))
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_secs(2));
    }
}
