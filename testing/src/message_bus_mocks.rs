//! In-memory message bus for fast, deterministic tests.
//!
//! [`InMemoryMessageBus`] delivers every published envelope to every current
//! subscriber of the destination and keeps a log of everything published, so
//! tests can assert both on what a service received and on what it sent (or did
//! not send).

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on poisoned locks

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use stockflow_core::message::{Envelope, Message};
use stockflow_core::message_bus::{MessageBus, MessageBusError, MessageStream};
use tokio::sync::mpsc;

type Subscriber = mpsc::UnboundedSender<Result<Envelope, MessageBusError>>;

#[derive(Default)]
struct Inner {
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
    published: RwLock<Vec<(String, Envelope)>>,
    failing: AtomicBool,
}

/// In-memory message bus.
///
/// Messages published before anyone subscribes to a destination are recorded
/// but not delivered, like a broker consumer starting at the latest offset.
///
/// # Example
///
/// ```
/// use stockflow_testing::InMemoryMessageBus;
/// use stockflow_core::message::Envelope;
/// use stockflow_core::message_bus::MessageBus;
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryMessageBus::new();
/// let mut stream = bus.subscribe(&["orders"]).await?;
///
/// bus.publish("orders", &Envelope::new("Order.v1".to_string(), vec![])).await?;
///
/// assert!(stream.next().await.is_some());
/// assert_eq!(bus.published_count("orders"), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryMessageBus {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for InMemoryMessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryMessageBus")
            .field("published", &self.inner.published.read().unwrap().len())
            .field("failing", &self.inner.failing.load(Ordering::SeqCst))
            .finish()
    }
}

impl InMemoryMessageBus {
    /// Create a new empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail with [`MessageBusError::PublishFailed`]
    /// (or succeed again with `false`).
    pub fn fail_publishes(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    /// All envelopes successfully published to `destination`, in order.
    #[must_use]
    pub fn published(&self, destination: &str) -> Vec<Envelope> {
        self.inner
            .published
            .read()
            .unwrap()
            .iter()
            .filter(|(d, _)| d == destination)
            .map(|(_, envelope)| envelope.clone())
            .collect()
    }

    /// Number of envelopes successfully published to `destination`.
    #[must_use]
    pub fn published_count(&self, destination: &str) -> usize {
        self.inner
            .published
            .read()
            .unwrap()
            .iter()
            .filter(|(d, _)| d == destination)
            .count()
    }

    /// Published envelopes on `destination` decoded as `M`, skipping anything
    /// that does not decode.
    #[must_use]
    pub fn decoded<M: Message>(&self, destination: &str) -> Vec<M> {
        self.published(destination)
            .iter()
            .filter_map(|envelope| M::from_envelope(envelope).ok())
            .collect()
    }

    /// Number of live subscriptions to `destination`.
    #[must_use]
    pub fn subscriber_count(&self, destination: &str) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap()
            .get(destination)
            .map_or(0, |subs| subs.iter().filter(|tx| !tx.is_closed()).count())
    }

    /// Forget everything published so far (for test isolation).
    pub fn clear(&self) {
        self.inner.published.write().unwrap().clear();
    }

    fn deliver(&self, destination: &str, envelope: &Envelope) {
        let mut subscribers = self.inner.subscribers.write().unwrap();
        if let Some(subs) = subscribers.get_mut(destination) {
            subs.retain(|tx| tx.send(Ok(envelope.clone())).is_ok());
        }
    }
}

impl MessageBus for InMemoryMessageBus {
    fn publish(
        &self,
        destination: &str,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), MessageBusError>> + Send + '_>> {
        let destination = destination.to_string();
        let envelope = envelope.clone();

        Box::pin(async move {
            if self.inner.failing.load(Ordering::SeqCst) {
                return Err(MessageBusError::PublishFailed {
                    destination,
                    reason: "in-memory bus configured to fail".to_string(),
                });
            }

            self.inner
                .published
                .write()
                .unwrap()
                .push((destination.clone(), envelope.clone()));
            self.deliver(&destination, &envelope);
            Ok(())
        })
    }

    fn subscribe(
        &self,
        destinations: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, MessageBusError>> + Send + '_>> {
        let destinations: Vec<String> = destinations.iter().map(|s| (*s).to_string()).collect();

        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            {
                let mut subscribers = self.inner.subscribers.write().unwrap();
                for destination in destinations {
                    subscribers.entry(destination).or_default().push(tx.clone());
                }
            }

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as MessageStream)
        })
    }
}
