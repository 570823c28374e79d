//! Circuit breaker for protecting callers from a degraded dependency.
//!
//! A circuit breaker tracks consecutive failures of a dependency and "opens"
//! (stops admitting calls) once they reach a threshold, so callers fail fast
//! instead of piling more load onto something that is already struggling.
//!
//! # States
//!
//! ```text
//! Closed ──[failures >= failure_threshold]──> Open
//!                                               │
//!                                               │ [allow() after reset_timeout]
//!                                               ▼
//!                                            HalfOpen
//!                                               │
//!              ┌────────────────────────────────┴──────────────┐
//!   [successes >= half_open_successes_required]          [any failure]
//!              ▼                                               ▼
//!           Closed                                           Open
//! ```
//!
//! No other transition exists. The move to `HalfOpen` is evaluated lazily inside
//! [`CircuitBreaker::allow`] by comparing the stored open timestamp against the
//! injected clock; there is no background timer.
//!
//! # Example
//!
//! ```rust
//! use stockflow_runtime::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
//! use std::time::Duration;
//!
//! let config = CircuitBreakerConfig::builder()
//!     .failure_threshold(3)
//!     .reset_timeout(Duration::from_secs(10))
//!     .half_open_successes_required(2)
//!     .build();
//!
//! let breaker = CircuitBreaker::new(config);
//!
//! for _ in 0..3 {
//!     assert!(breaker.allow());
//!     breaker.record_failure();
//! }
//!
//! assert_eq!(breaker.state(), CircuitState::Open);
//! assert!(!breaker.allow());
//! ```

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use stockflow_core::environment::{Clock, SystemClock};
use thiserror::Error;

use crate::metrics::CircuitBreakerMetrics;

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: usize,
    /// Duration the circuit stays open before a probe is admitted
    pub reset_timeout: Duration,
    /// Number of consecutive successes in `HalfOpen` before closing the circuit
    pub half_open_successes_required: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(10),
            half_open_successes_required: 2,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub const fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder {
            failure_threshold: None,
            reset_timeout: None,
            half_open_successes_required: None,
        }
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfigBuilder {
    failure_threshold: Option<usize>,
    reset_timeout: Option<Duration>,
    half_open_successes_required: Option<usize>,
}

impl CircuitBreakerConfigBuilder {
    /// Set the failure threshold.
    ///
    /// Circuit opens after this many consecutive failures. Values below 1 are
    /// treated as 1.
    #[must_use]
    pub const fn failure_threshold(mut self, threshold: usize) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    /// Set how long the circuit stays open before admitting a probe.
    #[must_use]
    pub const fn reset_timeout(mut self, duration: Duration) -> Self {
        self.reset_timeout = Some(duration);
        self
    }

    /// Set the number of consecutive `HalfOpen` successes needed to close.
    ///
    /// Values below 1 are treated as 1.
    #[must_use]
    pub const fn half_open_successes_required(mut self, threshold: usize) -> Self {
        self.half_open_successes_required = Some(threshold);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> CircuitBreakerConfig {
        let defaults = CircuitBreakerConfig::default();
        CircuitBreakerConfig {
            failure_threshold: self
                .failure_threshold
                .unwrap_or(defaults.failure_threshold)
                .max(1),
            reset_timeout: self.reset_timeout.unwrap_or(defaults.reset_timeout),
            half_open_successes_required: self
                .half_open_successes_required
                .unwrap_or(defaults.half_open_successes_required)
                .max(1),
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, calls pass through normally
    Closed,
    /// Circuit is open, calls are rejected
    Open,
    /// Circuit is half-open, testing whether the dependency recovered
    HalfOpen,
}

impl CircuitState {
    /// Numeric encoding used by the state gauge (0=closed, 1=half-open, 2=open).
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

/// Errors from [`CircuitBreaker::call`].
#[derive(Error, Debug)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, call rejected without running the operation
    #[error("Circuit breaker is open")]
    Open,
    /// Operation ran and failed
    #[error("Operation failed: {0}")]
    Inner(E),
}

/// Lifetime counters for a breaker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CircuitBreakerStats {
    /// Calls admitted by `allow()`
    pub admitted: u64,
    /// Calls rejected by `allow()`
    pub rejected: u64,
    /// Outcomes recorded as success
    pub successes: u64,
    /// Outcomes recorded as failure
    pub failures: u64,
}

/// Mutable state, guarded by a single lock so counters and state change together.
#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: usize,
    half_open_successes: usize,
    opened_at: Option<DateTime<Utc>>,
    stats: CircuitBreakerStats,
}

/// Three-state admission control for one protected dependency.
///
/// Cloning is cheap and clones share state, so a single breaker can be handed to
/// the request path and to completion callbacks alike.
#[derive(Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    state: Arc<Mutex<BreakerState>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker reading time from the system clock.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a new circuit breaker with an injected clock.
    #[must_use]
    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        CircuitBreakerMetrics::record_state(CircuitState::Closed);
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                opened_at: None,
                stats: CircuitBreakerStats::default(),
            })),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// The configuration this breaker was built with.
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current stored state.
    ///
    /// This does not evaluate the reset timeout: an `Open` breaker whose timeout
    /// has elapsed still reports `Open` until the next [`allow`](Self::allow).
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Lifetime counters.
    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        self.lock().stats
    }

    /// Decide whether a call may proceed.
    ///
    /// Always `true` when `Closed` or `HalfOpen`. When `Open`, returns `true` only
    /// if `reset_timeout` has elapsed since the circuit opened, moving to
    /// `HalfOpen` in the same step.
    pub fn allow(&self) -> bool {
        let mut state = self.lock();

        let admitted = match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = state
                    .opened_at
                    .and_then(|opened_at| (self.clock.now() - opened_at).to_std().ok())
                    .unwrap_or(Duration::ZERO);

                if elapsed >= self.config.reset_timeout {
                    tracing::info!(
                        elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                        "Circuit breaker transitioning OPEN -> HALF_OPEN"
                    );
                    state.state = CircuitState::HalfOpen;
                    state.half_open_successes = 0;
                    CircuitBreakerMetrics::record_transition("open", "half_open");
                    CircuitBreakerMetrics::record_state(CircuitState::HalfOpen);
                    true
                } else {
                    false
                }
            }
        };

        if admitted {
            state.stats.admitted += 1;
        } else {
            state.stats.rejected += 1;
            CircuitBreakerMetrics::record_rejection();
        }
        admitted
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut state = self.lock();
        state.stats.successes += 1;
        state.consecutive_failures = 0;
        CircuitBreakerMetrics::record_success();

        if state.state == CircuitState::HalfOpen {
            state.half_open_successes += 1;
            if state.half_open_successes >= self.config.half_open_successes_required {
                tracing::info!(
                    successes = state.half_open_successes,
                    "Circuit breaker transitioning HALF_OPEN -> CLOSED"
                );
                state.state = CircuitState::Closed;
                state.half_open_successes = 0;
                state.opened_at = None;
                CircuitBreakerMetrics::record_transition("half_open", "closed");
                CircuitBreakerMetrics::record_state(CircuitState::Closed);
            }
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut state = self.lock();
        state.stats.failures += 1;
        CircuitBreakerMetrics::record_failure();

        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!(
                        failures = state.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker transitioning CLOSED -> OPEN"
                    );
                    state.state = CircuitState::Open;
                    state.opened_at = Some(self.clock.now());
                    CircuitBreakerMetrics::record_transition("closed", "open");
                    CircuitBreakerMetrics::record_state(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(
                    successes = state.half_open_successes,
                    "Circuit breaker transitioning HALF_OPEN -> OPEN (recovery failed)"
                );
                state.state = CircuitState::Open;
                state.consecutive_failures += 1;
                state.half_open_successes = 0;
                state.opened_at = Some(self.clock.now());
                CircuitBreakerMetrics::record_transition("half_open", "open");
                CircuitBreakerMetrics::record_state(CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Run an operation through the breaker.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitBreakerError::Open`] without running `operation` if the
    /// circuit rejects the call, or [`CircuitBreakerError::Inner`] if the
    /// operation itself fails.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        if !self.allow() {
            tracing::warn!("Circuit breaker is OPEN, rejecting request");
            return Err(CircuitBreakerError::Open);
        }

        match operation().await {
            Ok(result) => {
                self.record_success();
                Ok(result)
            }
            Err(err) => {
                self.record_failure();
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }
}
