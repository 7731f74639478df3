//! # Circuit Breaker Implementation
//!
//! Fault isolation for a single unreliable dependency. Three states:
//! Closed (normal operation), Open (failing fast), and Half-Open (probing).
//!
//! There is no background timer. An Open breaker becomes Half-Open lazily, on
//! the first [`CircuitBreaker::can_execute`] check made after the open timeout
//! has elapsed.

use crate::constants::{metrics as metric_names, tags as tag_keys};
use crate::error::{BoxError, ResilienceError};
use crate::resilience::metrics::{metric_tags, SharedMetricsSink, TracingMetricsSink};
use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Probing recovery - calls are let through to test the dependency
    HalfOpen = 2,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open; the operation was not invoked
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    /// Operation failed and was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

impl<E> From<CircuitBreakerError<E>> for ResilienceError
where
    E: Into<BoxError>,
{
    fn from(error: CircuitBreakerError<E>) -> Self {
        match error {
            CircuitBreakerError::CircuitOpen { component } => {
                ResilienceError::CircuitOpen { service: component }
            }
            CircuitBreakerError::OperationFailed(source) => {
                ResilienceError::OperationFailed(source.into())
            }
        }
    }
}

/// Mutable breaker state; every read-modify-write happens under one lock
#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<DateTime<Utc>>,
    next_attempt_at: Option<Instant>,
}

/// Lock-free counters feeding [`CircuitBreakerMetrics`]
#[derive(Debug, Default)]
struct CallCounters {
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    rejected_count: AtomicU64,
    total_duration_nanos: AtomicU64,
}

impl CallCounters {
    fn record(&self, success: bool, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        if success {
            self.success_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failure_count.fetch_add(1, Ordering::Relaxed);
        }
        self.total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }
}

/// Per-dependency circuit breaker
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Service name for logging and metrics
    name: String,

    config: CircuitBreakerConfig,

    inner: Mutex<BreakerState>,

    counters: CallCounters,

    sink: SharedMetricsSink,
}

impl CircuitBreaker {
    /// Create a new circuit breaker, rejecting a zero threshold or timeout
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> crate::Result<Self> {
        Self::with_metrics_sink(name, config, Arc::new(TracingMetricsSink))
    }

    /// Create a circuit breaker that reports to the given metrics sink
    pub fn with_metrics_sink(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        sink: SharedMetricsSink,
    ) -> crate::Result<Self> {
        let name = name.into();
        config.validate().map_err(|reason| {
            ResilienceError::Configuration(format!("circuit breaker '{name}': {reason}"))
        })?;

        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            timeout_seconds = config.timeout.as_secs_f64(),
            "Circuit breaker initialized"
        );

        Ok(Self {
            name,
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
                next_attempt_at: None,
            }),
            counters: CallCounters::default(),
            sink,
        })
    }

    /// Whether a configuration is acceptable for construction
    pub fn validate_config(config: &CircuitBreakerConfig) -> bool {
        config.validate().is_ok()
    }

    /// Admission check.
    ///
    /// This is not a pure read: when the breaker is Open and the timeout has
    /// elapsed, the check itself moves the breaker to Half-Open. The check and
    /// the transition happen under one lock, so only one caller performs the
    /// transition. Concurrent callers that check while Half-Open are all
    /// admitted, so simultaneous probes are possible.
    pub fn can_execute(&self) -> bool {
        let (allowed, transitioned) = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed | CircuitState::HalfOpen => (true, false),
                CircuitState::Open => {
                    let due = inner
                        .next_attempt_at
                        .is_some_and(|next_attempt| Instant::now() >= next_attempt);
                    if due {
                        inner.state = CircuitState::HalfOpen;
                        (true, true)
                    } else {
                        (false, false)
                    }
                }
            }
        };

        if transitioned {
            info!(component = %self.name, "Circuit breaker half-open (probing recovery)");
            self.emit_transition(CircuitState::Open, CircuitState::HalfOpen);
        }

        allowed
    }

    /// Reset the failure count and force the breaker Closed from any state
    pub fn record_success(&self) {
        let previous = {
            let mut inner = self.inner.lock();
            let previous = inner.state;
            inner.failure_count = 0;
            inner.state = CircuitState::Closed;
            inner.next_attempt_at = None;
            previous
        };

        debug!(component = %self.name, "Operation succeeded");

        if previous != CircuitState::Closed {
            info!(
                component = %self.name,
                from = %previous,
                "Circuit breaker closed (recovered)"
            );
            self.emit_transition(previous, CircuitState::Closed);
        }
    }

    /// Count a failure; trips the breaker once the threshold is reached.
    ///
    /// The retry deadline is computed only on the transition into Open, so
    /// failures recorded while already Open never postpone recovery.
    ///
    /// A failure while Half-Open reopens the breaker regardless of the
    /// threshold. The count is normally already at or above it there; the
    /// exception is a breaker forced open, where the probe failure still
    /// reopens rather than falling back to Closed.
    pub fn record_failure(&self) {
        let (tripped_from, failure_count) = {
            let mut inner = self.inner.lock();
            inner.failure_count = inner.failure_count.saturating_add(1);
            inner.last_failure_time = Some(Utc::now());

            let should_trip = match inner.state {
                CircuitState::Open => false,
                CircuitState::HalfOpen => true,
                CircuitState::Closed => inner.failure_count >= self.config.failure_threshold,
            };

            let tripped_from = if should_trip {
                let previous = inner.state;
                inner.state = CircuitState::Open;
                inner.next_attempt_at = self.recovery_deadline();
                Some(previous)
            } else {
                None
            };
            (tripped_from, inner.failure_count)
        };

        warn!(
            component = %self.name,
            failure_count = failure_count,
            failure_threshold = self.config.failure_threshold,
            "Operation failed"
        );

        if let Some(previous) = tripped_from {
            error!(
                component = %self.name,
                failure_count = failure_count,
                failure_threshold = self.config.failure_threshold,
                timeout_seconds = self.config.timeout.as_secs_f64(),
                "Circuit breaker opened (failing fast)"
            );
            self.emit_transition(previous, CircuitState::Open);
        }
    }

    /// Execute an operation with circuit breaker protection.
    ///
    /// A denied call returns `CircuitOpen` without invoking `operation`. The
    /// operation's own error is recorded as a failure and handed back unchanged
    /// inside `OperationFailed`.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.can_execute() {
            self.counters.rejected_count.fetch_add(1, Ordering::Relaxed);
            debug!(component = %self.name, "Call rejected by open circuit");
            self.sink.record(
                metric_names::CIRCUIT_BREAKER_REJECTED,
                1.0,
                &metric_tags([(tag_keys::SERVICE, self.name.clone())]),
            );
            return Err(CircuitBreakerError::CircuitOpen {
                component: self.name.clone(),
            });
        }

        let start_time = Instant::now();
        let result = operation().await;
        let duration = start_time.elapsed();

        match &result {
            Ok(_) => self.record_success_manual(duration),
            Err(_) => self.record_failure_manual(duration),
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Record a successful call made after a separate [`can_execute`](Self::can_execute)
    /// check, including it in the call metrics
    pub fn record_success_manual(&self, duration: Duration) {
        self.counters.record(true, duration);
        self.record_success();
        self.sink.record(
            metric_names::CIRCUIT_BREAKER_SUCCESS,
            duration.as_secs_f64() * 1000.0,
            &metric_tags([(tag_keys::SERVICE, self.name.clone())]),
        );
    }

    /// Failure counterpart of [`record_success_manual`](Self::record_success_manual)
    pub fn record_failure_manual(&self, duration: Duration) {
        self.counters.record(false, duration);
        self.record_failure();
        self.sink.record(
            metric_names::CIRCUIT_BREAKER_FAILURE,
            duration.as_secs_f64() * 1000.0,
            &metric_tags([(tag_keys::SERVICE, self.name.clone())]),
        );
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        let previous = {
            let mut inner = self.inner.lock();
            let previous = inner.state;
            inner.state = CircuitState::Open;
            inner.next_attempt_at = self.recovery_deadline();
            previous
        };

        warn!(component = %self.name, "Circuit breaker forced open");
        if previous != CircuitState::Open {
            self.emit_transition(previous, CircuitState::Open);
        }
    }

    /// Force circuit to closed state (for emergency recovery)
    pub fn force_closed(&self) {
        warn!(component = %self.name, "Circuit breaker forced closed");
        self.record_success();
    }

    /// Get current circuit state without triggering the lazy transition
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn last_failure_time(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().last_failure_time
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get component name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let (state, consecutive_failures) = {
            let inner = self.inner.lock();
            (inner.state, inner.failure_count as u64)
        };

        let total_calls = self.counters.total_calls.load(Ordering::Relaxed);
        let success_count = self.counters.success_count.load(Ordering::Relaxed);
        let failure_count = self.counters.failure_count.load(Ordering::Relaxed);
        let total_nanos = self.counters.total_duration_nanos.load(Ordering::Relaxed);

        let (failure_rate, success_rate, average_duration) = if total_calls > 0 {
            (
                failure_count as f64 / total_calls as f64,
                success_count as f64 / total_calls as f64,
                Duration::from_nanos(total_nanos / total_calls),
            )
        } else {
            (0.0, 0.0, Duration::ZERO)
        };

        CircuitBreakerMetrics {
            total_calls,
            success_count,
            failure_count,
            rejected_count: self.counters.rejected_count.load(Ordering::Relaxed),
            consecutive_failures,
            current_state: state,
            failure_rate,
            success_rate,
            average_duration,
        }
    }

    /// Check if circuit is healthy (closed state with low failure rate)
    pub fn is_healthy(&self) -> bool {
        if self.state() != CircuitState::Closed {
            return false;
        }

        let total_calls = self.counters.total_calls.load(Ordering::Relaxed);
        if total_calls < 10 {
            // Too few calls to determine health
            return true;
        }

        let failures = self.counters.failure_count.load(Ordering::Relaxed);
        (failures as f64 / total_calls as f64) < 0.1
    }

    /// `None` when the timeout is too large to represent; the breaker then
    /// stays Open until a success or `force_closed`
    fn recovery_deadline(&self) -> Option<Instant> {
        Instant::now().checked_add(self.config.timeout)
    }

    fn emit_transition(&self, from: CircuitState, to: CircuitState) {
        self.sink.record(
            metric_names::CIRCUIT_BREAKER_STATE_TRANSITION,
            1.0,
            &metric_tags([
                (tag_keys::SERVICE, self.name.clone()),
                (tag_keys::FROM_STATE, from.to_string()),
                (tag_keys::TO_STATE, to.to_string()),
            ]),
        );
    }
}
