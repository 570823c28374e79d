//! Subscription loop feeding orders into the [`OrderProcessor`].
//!
//! The consumer subscribes to the orders destination and hands each decoded
//! order to its own task, so a slow order never holds up the ones behind it.
//! Payloads that do not decode as an [`Order`] are logged and skipped. If the
//! stream ends, the consumer resubscribes after `retry_delay` until shut down.

use futures::StreamExt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use stockflow_core::message::{Message, Order};
use stockflow_core::message_bus::{MessageBus, MessageBusError, MessageStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::processor::OrderProcessor;

/// Long-lived consumer of the orders destination.
pub struct OrderConsumer {
    processor: Arc<OrderProcessor>,
    bus: Arc<dyn MessageBus>,
    destination: String,
    shutdown: broadcast::Receiver<()>,
    retry_delay: Duration,
}

impl OrderConsumer {
    /// Create a consumer with the default retry delay (5 seconds).
    #[must_use]
    pub fn new(
        processor: Arc<OrderProcessor>,
        bus: Arc<dyn MessageBus>,
        destination: impl Into<String>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            processor,
            bus,
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

    /// Subscribe, then process deliveries on a background task.
    ///
    /// The subscription is in place when this returns, so orders published
    /// afterwards are not missed.
    ///
    /// # Errors
    ///
    /// Returns [`MessageBusError`] if the initial subscription fails.
    pub async fn spawn(mut self) -> Result<JoinHandle<()>, MessageBusError> {
        let stream = self.bus.subscribe(&[self.destination.as_str()]).await?;
        info!(destination = %self.destination, "Order consumer subscribed");
        Ok(tokio::spawn(async move {
            self.run(stream).await;
        }))
    }

    async fn run(&mut self, mut stream: MessageStream) {
        loop {
            if self.process_stream(&mut stream).await.is_break() {
                break;
            }
            match self.resubscribe().await {
                Some(next) => stream = next,
                None => break,
            }
        }
        info!(destination = %self.destination, "Order consumer stopped");
    }

    /// Returns `Break` on shutdown, `Continue` when the stream ended.
    async fn process_stream(&mut self, stream: &mut MessageStream) -> ControlFlow<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(destination = %self.destination, "Order consumer received shutdown signal");
                    return ControlFlow::Break(());
                }
                delivery = stream.next() => match delivery {
                    Some(Ok(envelope)) => match Order::from_envelope(&envelope) {
                        Ok(order) => Self::dispatch(Arc::clone(&self.processor), order),
                        Err(e) => warn!(
                            message_type = %envelope.message_type,
                            error = %e,
                            "Skipping undecodable order"
                        ),
                    },
                    Some(Err(e)) => error!(error = %e, "Error receiving order from stream"),
                    None => {
                        warn!(destination = %self.destination, "Order stream ended");
                        return ControlFlow::Continue(());
                    }
                },
            }
        }
    }

    fn dispatch(processor: Arc<OrderProcessor>, order: Order) {
        tokio::spawn(async move {
            if let Err(e) = processor.consume(&order).await {
                error!(
                    correlation_id = %order.correlation_id,
                    error = %e,
                    "Failed to publish confirmation"
                );
            }
        });
    }

    async fn resubscribe(&mut self) -> Option<MessageStream> {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => return None,
                () = tokio::time::sleep(self.retry_delay) => {}
            }
            match self.bus.subscribe(&[self.destination.as_str()]).await {
                Ok(stream) => {
                    info!(destination = %self.destination, "Order consumer resubscribed");
                    return Some(stream);
                }
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
