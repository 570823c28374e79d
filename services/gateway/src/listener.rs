//! Long-lived subscription routing confirmations to pending submissions.
//!
//! One listener serves every in-flight submission of a gateway. It holds no
//! state of its own: each [`Confirmation`] is resolved against the shared
//! [`PendingRequestRegistry`] by correlation ID. A confirmation with no pending
//! entry (late, duplicate, or meant for another gateway) is discarded by the
//! registry and logged at debug.

use futures::StreamExt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use stockflow_core::message::{Confirmation, CorrelationId, Message};
use stockflow_core::message_bus::{MessageBus, MessageBusError, MessageStream};
use stockflow_runtime::PendingRequestRegistry;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Subscriber of the confirmations destination.
pub struct ConfirmationListener {
    bus: Arc<dyn MessageBus>,
    registry: PendingRequestRegistry<CorrelationId, Confirmation>,
    destination: String,
    shutdown: broadcast::Receiver<()>,
    retry_delay: Duration,
}

impl ConfirmationListener {
    /// Create a listener with the default retry delay (5 seconds).
    #[must_use]
    pub fn new(
        bus: Arc<dyn MessageBus>,
        registry: PendingRequestRegistry<CorrelationId, Confirmation>,
        destination: impl Into<String>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            bus,
            registry,
            destination: destination.into(),
            shutdown,
            retry_delay: Duration::from_secs(5),
        }
    }

    /// Set the delay before resubscribing after the stream ends.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Subscribe, then route confirmations on a background task.
    ///
    /// # Errors
    ///
    /// Returns [`MessageBusError`] if the initial subscription fails.
    pub async fn spawn(mut self) -> Result<JoinHandle<()>, MessageBusError> {
        let stream = self.bus.subscribe(&[self.destination.as_str()]).await?;
        info!(destination = %self.destination, "Confirmation listener subscribed");
        Ok(tokio::spawn(async move {
            self.run(stream).await;
        }))
    }

    async fn run(&mut self, mut stream: MessageStream) {
        loop {
            if self.route(&mut stream).await.is_break() {
                break;
            }
            match self.resubscribe().await {
                Some(next) => stream = next,
                None => break,
            }
        }
        info!(destination = %self.destination, "Confirmation listener stopped");
    }

    async fn route(&mut self, stream: &mut MessageStream) -> ControlFlow<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => return ControlFlow::Break(()),
                delivery = stream.next() => match delivery {
                    Some(Ok(envelope)) => match Confirmation::from_envelope(&envelope) {
                        Ok(confirmation) => {
                            let correlation_id = confirmation.correlation_id;
                            if self.registry.resolve(&correlation_id, confirmation) {
                                debug!(%correlation_id, "Confirmation delivered");
                            }
                        }
                        Err(e) => warn!(
                            message_type = %envelope.message_type,
                            error = %e,
                            "Skipping undecodable confirmation"
                        ),
                    },
                    Some(Err(e)) => error!(error = %e, "Error receiving confirmation from stream"),
                    None => {
                        warn!(destination = %self.destination, "Confirmation stream ended");
                        return ControlFlow::Continue(());
                    }
                },
            }
        }
    }

    async fn resubscribe(&mut self) -> Option<MessageStream> {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => return None,
                () = tokio::time::sleep(self.retry_delay) => {}
            }
            match self.bus.subscribe(&[self.destination.as_str()]).await {
                Ok(stream) => return Some(stream),
                Err(e) => error!(
                    destination = %self.destination,
                    error = %e,
                    "Failed to resubscribe, retrying in {:?}",
                    self.retry_delay
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Test code

    use super::*;
    use stockflow_core::message::Order;
    use stockflow_runtime::Resolution;
    use stockflow_testing::InMemoryMessageBus;

    async fn listening(
        bus: &InMemoryMessageBus,
    ) -> (PendingRequestRegistry<CorrelationId, Confirmation>, broadcast::Sender<()>, JoinHandle<()>) {
        let registry = PendingRequestRegistry::new();
        let (tx, rx) = broadcast::channel(1);
        let handle = ConfirmationListener::new(Arc::new(bus.clone()), registry.clone(), "cart_updates", rx)
            .spawn()
            .await
            .unwrap();
        (registry, tx, handle)
    }

    #[tokio::test]
    async fn resolves_matching_entry() {
        let bus = InMemoryMessageBus::new();
        let (registry, _shutdown, _handle) = listening(&bus).await;
        let order = Order::new(CorrelationId::new(), "item1", 1);
        let (tx, rx) = tokio::sync::oneshot::channel();
        registry
            .register(order.correlation_id, move |r| { let _ = tx.send(r); }, Duration::from_secs(5))
            .unwrap();

        let confirmation = Confirmation::accepted(&order, 9);
        bus.publish("cart_updates", &confirmation.to_envelope().unwrap()).await.unwrap();

        assert_eq!(rx.await.unwrap(), Resolution::Resolved(confirmation));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn same_item_confirmations_do_not_cross_resolve() {
        let bus = InMemoryMessageBus::new();
        let (registry, _shutdown, _handle) = listening(&bus).await;
        let first = Order::new(CorrelationId::new(), "item1", 1);
        let second = Order::new(CorrelationId::new(), "item1", 1);
        let (tx, mut rx) = tokio::sync::oneshot::channel();
        registry
            .register(first.correlation_id, move |r| { let _ = tx.send(r); }, Duration::from_secs(5))
            .unwrap();

        bus.publish("cart_updates", &Confirmation::accepted(&second, 8).to_envelope().unwrap())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(rx.try_recv().is_err());
        assert!(registry.contains(&first.correlation_id));
    }

    #[tokio::test]
    async fn stops_on_shutdown() {
        let bus = InMemoryMessageBus::new();
        let (_registry, shutdown, handle) = listening(&bus).await;

        shutdown.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
