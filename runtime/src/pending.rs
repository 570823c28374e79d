//! Correlation registry turning one-way messaging into request/reply.
//!
//! A caller that sends a request over the bus registers a one-shot completion
//! handler under the request's correlation key. Exactly one of two things then
//! removes the entry:
//!
//! - [`PendingRequestRegistry::resolve`], when the matching reply arrives
//! - the entry's deadline timer, which fires the handler with [`Resolution::TimedOut`]
//!
//! Both paths remove the entry from the map before touching the handler, and the
//! map's remove is atomic, so whichever gets there first runs the handler and the
//! other finds nothing. No extra flag or lock is needed for the handler to fire at
//! most once.
//!
//! # Example
//!
//! ```rust
//! use stockflow_runtime::pending::{PendingRequestRegistry, Resolution};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry: PendingRequestRegistry<u64, &'static str> = PendingRequestRegistry::new();
//! let (tx, rx) = tokio::sync::oneshot::channel();
//!
//! registry.register(7, move |resolution| { let _ = tx.send(resolution); }, Duration::from_secs(5))?;
//!
//! assert!(registry.resolve(&7, "done"));
//! assert!(!registry.resolve(&7, "again"));
//! assert_eq!(rx.await?, Resolution::Resolved("done"));
//! # Ok(())
//! # }
//! ```

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::metrics::PendingRequestMetrics;

/// Errors from registry operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// An entry with the same key is already pending.
    #[error("Correlation key '{0}' is already pending")]
    DuplicateCorrelation(String),
}

/// What a completion handler receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<T> {
    /// The reply arrived before the deadline.
    Resolved(T),
    /// The deadline elapsed first.
    TimedOut,
}

type CompletionHandler<T> = Box<dyn FnOnce(Resolution<T>) + Send + 'static>;

// Mutex keeps the entry `Sync`; the handler is only taken after removal.
struct PendingEntry<T> {
    handler: Mutex<CompletionHandler<T>>,
    timer: AbortHandle,
}

impl<T> PendingEntry<T> {
    fn fire(self, resolution: Resolution<T>) {
        let handler = self
            .handler
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        handler(resolution);
    }
}

/// Far enough out to never fire, close enough not to overflow `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Receipt for a registered request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingHandle<K> {
    key: K,
    deadline: Instant,
}

impl<K> PendingHandle<K> {
    /// Correlation key the entry was registered under.
    #[must_use]
    pub const fn key(&self) -> &K {
        &self.key
    }

    /// Instant at which the entry expires if still pending.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }
}

/// Concurrent map from correlation key to a one-shot completion handler with expiry.
///
/// Cloning is cheap and clones share entries.
pub struct PendingRequestRegistry<K, T> {
    entries: Arc<DashMap<K, PendingEntry<T>>>,
}

impl<K, T> Clone for PendingRequestRegistry<K, T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K, T> Default for PendingRequestRegistry<K, T>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }
}

impl<K, T> std::fmt::Debug for PendingRequestRegistry<K, T>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequestRegistry")
            .field("pending", &self.entries.len())
            .finish()
    }
}

impl<K, T> PendingRequestRegistry<K, T>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    T: Send + 'static,
{
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a completion handler that fires once, on reply or after `timeout`.
    ///
    /// Must be called from within a Tokio runtime: the deadline is a spawned
    /// timer task. A `timeout` too large to represent as an instant is clamped
    /// to roughly thirty years.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateCorrelation`] if `key` is already pending.
    /// The existing entry is left untouched and `on_resolve` is dropped unfired.
    pub fn register<F>(
        &self,
        key: K,
        on_resolve: F,
        timeout: Duration,
    ) -> Result<PendingHandle<K>, RegistryError>
    where
        F: FnOnce(Resolution<T>) + Send + 'static,
    {
        match self.entries.entry(key.clone()) {
            Entry::Occupied(_) => {
                tracing::warn!(correlation_id = %key, "Rejecting duplicate correlation key");
                Err(RegistryError::DuplicateCorrelation(key.to_string()))
            }
            Entry::Vacant(slot) => {
                let now = Instant::now();
                let deadline = now
                    .checked_add(timeout)
                    .unwrap_or_else(|| now + FAR_FUTURE);
                let registry = self.clone();
                let timer_key = key.clone();
                // The shard stays locked until `insert` returns, so even a zero
                // timeout cannot remove the entry before it exists.
                let timer = tokio::spawn(async move {
                    tokio::time::sleep_until(deadline).await;
                    registry.expire(&timer_key);
                });
                slot.insert(PendingEntry {
                    handler: Mutex::new(Box::new(on_resolve)),
                    timer: timer.abort_handle(),
                });
                PendingRequestMetrics::record_registered(self.entries.len());
                tracing::debug!(correlation_id = %key, ?timeout, "Pending request registered");
                Ok(PendingHandle { key, deadline })
            }
        }
    }

    /// Complete the entry for `key` with `value`.
    ///
    /// Returns `false` if there is no such entry, because it was already
    /// resolved, expired, cancelled, or never existed. The handler runs on the
    /// calling task.
    pub fn resolve(&self, key: &K, value: T) -> bool {
        let Some((_, entry)) = self.entries.remove(key) else {
            PendingRequestMetrics::record_late();
            tracing::debug!(correlation_id = %key, "No pending request for reply, discarding");
            return false;
        };
        entry.timer.abort();
        PendingRequestMetrics::record_resolved(self.entries.len());
        entry.fire(Resolution::Resolved(value));
        true
    }

    /// Remove the entry for `key` without firing its handler.
    ///
    /// Only meant for requests that were never actually sent.
    pub fn cancel(&self, key: &K) -> bool {
        let Some((_, entry)) = self.entries.remove(key) else {
            return false;
        };
        entry.timer.abort();
        PendingRequestMetrics::record_cancelled(self.entries.len());
        tracing::debug!(correlation_id = %key, "Pending request cancelled");
        true
    }

    /// Fire the entry for `key` with [`Resolution::TimedOut`] if still pending.
    fn expire(&self, key: &K) -> bool {
        let Some((_, entry)) = self.entries.remove(key) else {
            return false;
        };
        PendingRequestMetrics::record_expired(self.entries.len());
        tracing::debug!(correlation_id = %key, "Pending request expired");
        entry.fire(Resolution::TimedOut);
        true
    }

    /// Whether `key` is still pending.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
