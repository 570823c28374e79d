//! Redpanda message bus implementation for Stockflow.
//!
//! This crate provides a Redpanda-based message bus that implements the
//! [`MessageBus`] trait from `stockflow-core`. It uses rdkafka, so any
//! Kafka-compatible broker works (Redpanda, Apache Kafka, MSK, ...).
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - Offsets are committed AFTER the envelope is handed to the subscriber's channel
//! - If the process crashes before commit, messages will be redelivered
//! - Ordering is guaranteed within a partition (same message type)
//!
//! Each Kafka destination doubles as the "queue" of the gateway/processor pair:
//! a consumer group shares one destination's messages among its members, which is
//! the work-queue behaviour the orders and confirmations destinations need.
//! Creating the topics is left to whoever operates the broker.
//!
//! `subscribe` returns once the consumer has joined its group, which is before
//! partitions are assigned. A brand-new group only sees envelopes produced in
//! that window when `auto_offset_reset` is "earliest"; the service binaries
//! configure it that way.
//!
//! # Example
//!
//! ```no_run
//! use stockflow_redpanda::RedpandaMessageBus;
//! use stockflow_core::message::{CorrelationId, Message, Order};
//! use stockflow_core::message_bus::MessageBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaMessageBus::new("localhost:9092")?;
//!
//! let order = Order::new(CorrelationId::new(), "item1", 5);
//! bus.publish("inventory_queue", &order.to_envelope()?).await?;
//!
//! let mut stream = bus.subscribe(&["cart_updates"]).await?;
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(envelope) => println!("Received: {}", envelope.message_type),
//!         Err(e) => eprintln!("Error: {e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message as _;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use stockflow_core::message::Envelope;
use stockflow_core::message_bus::{MessageBus, MessageBusError, MessageStream};
use stockflow_runtime::metrics::MessageBusMetrics;

/// Redpanda message bus implementation.
///
/// # Configuration
///
/// - **Broker addresses**: Bootstrap servers (required)
/// - **Producer settings**: Acks, compression, timeout
/// - **Consumer group**: Explicit ID or derived from subscribed destinations
/// - **Buffer size**: Envelope buffer capacity (default: 1000)
/// - **Offset reset**: Where new groups start reading (default: "latest")
pub struct RedpandaMessageBus {
    /// Kafka producer for publishing envelopes
    producer: FutureProducer,
    /// Broker addresses (for creating consumers)
    brokers: String,
    /// Producer timeout
    timeout: Duration,
    /// Consumer group ID (if explicitly set)
    consumer_group: Option<String>,
    /// Envelope buffer size for subscribers
    buffer_size: usize,
    /// Auto offset reset policy
    auto_offset_reset: String,
}

impl RedpandaMessageBus {
    /// Create a new Redpanda message bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`MessageBusError::ConnectionFailed`] if the producer cannot be
    /// created from the given broker list.
    pub fn new(brokers: &str) -> Result<Self, MessageBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the message bus.
    #[must_use]
    pub fn builder() -> RedpandaMessageBusBuilder {
        RedpandaMessageBusBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for configuring a [`RedpandaMessageBus`].
///
/// # Example
///
/// ```no_run
/// use stockflow_redpanda::RedpandaMessageBus;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = RedpandaMessageBus::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .consumer_group("order-processor")
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct RedpandaMessageBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaMessageBusBuilder {
    /// Set the broker addresses (comma-separated, e.g. "localhost:9092").
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1" or "all".
    ///
    /// Default: "all", since orders and confirmations ride on durable queues.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group ID for subscriptions.
    ///
    /// Members of the same group share a destination's messages. If not set, the
    /// group is derived from the subscribed destinations.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set the envelope buffer size for subscriptions (default: 1000).
    ///
    /// A value of 0 is treated as 1.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size.max(1));
        self
    }

    /// Set where new consumer groups start reading: "earliest", "latest" or "error".
    ///
    /// With "latest", envelopes produced between `subscribe` returning and the
    /// first partition assignment are skipped.
    ///
    /// Default: "latest"
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaMessageBus`].
    ///
    /// # Errors
    ///
    /// Returns [`MessageBusError::ConnectionFailed`] if brokers are not set or the
    /// producer cannot be created.
    pub fn build(self) -> Result<RedpandaMessageBus, MessageBusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| MessageBusError::ConnectionFailed("Brokers not configured".to_string()))?;
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| MessageBusError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        tracing::info!(
            brokers = %brokers,
            acks,
            compression,
            buffer_size = self.buffer_size.unwrap_or(1000),
            auto_offset_reset = self.auto_offset_reset.as_deref().unwrap_or("latest"),
            "RedpandaMessageBus created successfully"
        );

        Ok(RedpandaMessageBus {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            consumer_group: self.consumer_group,
            buffer_size: self.buffer_size.unwrap_or(1000),
            auto_offset_reset: self.auto_offset_reset.unwrap_or_else(|| "latest".to_string()),
        })
    }
}

impl MessageBus for RedpandaMessageBus {
    fn publish(
        &self,
        destination: &str,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), MessageBusError>> + Send + '_>> {
        let destination = destination.to_string();
        let envelope = envelope.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let started = Instant::now();
            let payload = bincode::serialize(&envelope).map_err(|e| MessageBusError::PublishFailed {
                destination: destination.clone(),
                reason: format!("Failed to serialize envelope: {e}"),
            })?;

            let record = FutureRecord::to(&destination)
                .payload(&payload)
                .key(envelope.message_type.as_bytes());

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    MessageBusMetrics::record_publish(started.elapsed());
                    tracing::debug!(
                        destination = %destination,
                        partition,
                        offset,
                        message_type = %envelope.message_type,
                        "Message published successfully"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    MessageBusMetrics::record_publish_error();
                    tracing::error!(
                        destination = %destination,
                        error = %kafka_error,
                        "Failed to publish message"
                    );
                    Err(MessageBusError::PublishFailed {
                        destination,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    #[allow(clippy::too_many_lines)] // Complexity required for at-least-once delivery with manual commits
    fn subscribe(
        &self,
        destinations: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, MessageBusError>> + Send + '_>> {
        let destinations: Vec<String> = destinations.iter().map(|s| (*s).to_string()).collect();
        let brokers = self.brokers.clone();
        let consumer_group = self.consumer_group.clone();
        let buffer_size = self.buffer_size;
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            let consumer_group_id = consumer_group.unwrap_or_else(|| {
                let mut sorted = destinations.clone();
                sorted.sort();
                format!("stockflow-{}", sorted.join("-"))
            });

            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| MessageBusError::SubscriptionFailed {
                    destinations: destinations.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            let refs: Vec<&str> = destinations.iter().map(String::as_str).collect();
            consumer
                .subscribe(&refs)
                .map_err(|e| MessageBusError::SubscriptionFailed {
                    destinations: destinations.clone(),
                    reason: format!("Failed to subscribe: {e}"),
                })?;

            tracing::info!(
                destinations = ?destinations,
                consumer_group = %consumer_group_id,
                buffer_size,
                auto_offset_reset = %auto_offset_reset,
                "Subscribed to destinations"
            );

            let (tx, rx) = tokio::sync::mpsc::channel(buffer_size);

            // The task owns the consumer and forwards envelopes until the
            // subscriber drops the stream.
            tokio::spawn(async move {
                use futures::StreamExt;
                use rdkafka::consumer::CommitMode;

                let mut stream = consumer.stream();

                while let Some(msg_result) = stream.next().await {
                    match msg_result {
                        Ok(message) => {
                            let result = match message.payload() {
                                None => Err(MessageBusError::DeserializationFailed(
                                    "Message has no payload".to_string(),
                                )),
                                Some(payload) => bincode::deserialize::<Envelope>(payload).map_err(|e| {
                                    MessageBusError::DeserializationFailed(format!(
                                        "Failed to deserialize envelope: {e}"
                                    ))
                                }),
                            };

                            match &result {
                                Ok(envelope) => {
                                    MessageBusMetrics::record_consume();
                                    tracing::trace!(
                                        destination = message.topic(),
                                        partition = message.partition(),
                                        offset = message.offset(),
                                        message_type = %envelope.message_type,
                                        "Received message"
                                    );
                                }
                                Err(_) => MessageBusMetrics::record_consume_error(),
                            }

                            // Only commit after the subscriber has the message.
                            if tx.send(result).await.is_err() {
                                tracing::debug!("Subscriber dropped, exiting consumer task");
                                break;
                            }

                            if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                                tracing::warn!(
                                    destination = message.topic(),
                                    partition = message.partition(),
                                    offset = message.offset(),
                                    error = %e,
                                    "Failed to commit offset (message may be redelivered)"
                                );
                            }
                        }
                        Err(e) => {
                            MessageBusMetrics::record_consume_error();
                            let err = MessageBusError::TransportError(format!(
                                "Failed to receive message: {e}"
                            ));
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                        }
                    }
                }

                tracing::debug!("Consumer task exiting");
            });

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
