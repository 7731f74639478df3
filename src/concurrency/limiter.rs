//! # Concurrency Limiter
//!
//! Caps simultaneous executions of a critical section (e.g. stock decrements)
//! with a semaphore. A caller that cannot get a slot within `lock_timeout`
//! fails with `ConcurrencyLimit` instead of blocking indefinitely. The wait
//! suspends the calling task; nothing is spawned.

use crate::constants::{defaults, metrics as metric_names};
use crate::error::{ResilienceError, Result};
use crate::resilience::metrics::{MetricTags, SharedMetricsSink, TracingMetricsSink};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Runtime configuration for [`ConcurrencyLimiter`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub max_concurrent: usize,
    /// Longest a caller waits for a slot
    pub lock_timeout: Duration,
    /// Recent wait samples kept for [`ConcurrencyLimiter::get_lock_wait_time`]
    pub wait_sample_window: usize,
}

impl ConcurrencyConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be greater than 0".to_string());
        }
        if self.lock_timeout.is_zero() {
            return Err("lock_timeout must be greater than 0".to_string());
        }
        if self.wait_sample_window == 0 {
            return Err("wait_sample_window must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::MAX_CONCURRENT,
            lock_timeout: Duration::from_millis(defaults::LOCK_TIMEOUT_MS),
            wait_sample_window: defaults::WAIT_SAMPLE_WINDOW,
        }
    }
}

#[derive(Debug)]
pub struct ConcurrencyLimiter {
    config: ConcurrencyConfig,
    semaphore: Semaphore,
    active: AtomicUsize,
    peak: AtomicUsize,
    wait_samples: Mutex<VecDeque<Duration>>,
    sink: SharedMetricsSink,
}

/// Held for the duration of one limited execution; releases the slot on drop,
/// including when the operation panics
#[derive(Debug)]
pub struct SlotGuard<'a> {
    limiter: &'a ConcurrencyLimiter,
    _permit: SemaphorePermit<'a>,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        // Decrement before the permit field is dropped
        let remaining = self.limiter.active.fetch_sub(1, Ordering::AcqRel) - 1;
        self.limiter
            .sink
            .record(metric_names::LIMITER_RELEASED, remaining as f64, &MetricTags::new());
    }
}

impl ConcurrencyLimiter {
    pub fn new(config: ConcurrencyConfig) -> Result<Self> {
        Self::with_metrics_sink(config, Arc::new(TracingMetricsSink))
    }

    pub fn with_metrics_sink(config: ConcurrencyConfig, sink: SharedMetricsSink) -> Result<Self> {
        config
            .validate()
            .map_err(|reason| ResilienceError::Configuration(format!("concurrency limiter: {reason}")))?;

        debug!(
            max_concurrent = config.max_concurrent,
            lock_timeout_ms = config.lock_timeout.as_millis() as u64,
            "Concurrency limiter initialized"
        );

        Ok(Self {
            semaphore: Semaphore::new(config.max_concurrent),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            wait_samples: Mutex::new(VecDeque::with_capacity(config.wait_sample_window)),
            config,
            sink,
        })
    }

    /// Wait up to `lock_timeout` for a slot
    pub async fn acquire(&self) -> Result<SlotGuard<'_>> {
        self.acquire_inner(None).await
    }

    /// Like [`acquire`](Self::acquire), returning `Cancelled` as soon as the
    /// token fires, even before the timeout
    pub async fn acquire_cancellable(&self, token: &CancellationToken) -> Result<SlotGuard<'_>> {
        self.acquire_inner(Some(token)).await
    }

    async fn acquire_inner(&self, token: Option<&CancellationToken>) -> Result<SlotGuard<'_>> {
        let started = Instant::now();
        let acquire = tokio::time::timeout(self.config.lock_timeout, self.semaphore.acquire());

        let outcome = match token {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(waited_ms = started.elapsed().as_millis() as u64, "Slot wait cancelled");
                    self.sink.record(
                        metric_names::LIMITER_CANCELLED,
                        started.elapsed().as_secs_f64() * 1000.0,
                        &MetricTags::new(),
                    );
                    return Err(ResilienceError::Cancelled);
                }
                outcome = acquire => outcome,
            },
            None => acquire.await,
        };

        let waited = started.elapsed();
        let permit = match outcome {
            Ok(Ok(permit)) => permit,
            Ok(Err(_closed)) => {
                return Err(ResilienceError::invalid_state(
                    "concurrency limiter semaphore closed",
                ))
            }
            Err(_elapsed) => {
                warn!(
                    max_concurrent = self.config.max_concurrent,
                    waited_ms = waited.as_millis() as u64,
                    "Timed out waiting for concurrency slot"
                );
                self.sink.record(
                    metric_names::LIMITER_TIMEOUT,
                    waited.as_secs_f64() * 1000.0,
                    &MetricTags::new(),
                );
                return Err(ResilienceError::ConcurrencyLimit {
                    max_concurrent: self.config.max_concurrent,
                    waited,
                });
            }
        };

        let active = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(active, Ordering::AcqRel);
        self.record_wait(waited);

        self.sink
            .record(metric_names::LIMITER_ACQUIRED, active as f64, &MetricTags::new());
        self.sink.record(
            metric_names::LIMITER_WAIT_MS,
            waited.as_secs_f64() * 1000.0,
            &MetricTags::new(),
        );

        Ok(SlotGuard {
            limiter: self,
            _permit: permit,
        })
    }

    /// Run `operation` inside a slot. The slot is released however the
    /// operation ends.
    pub async fn execute_with_limit<F, Fut>(&self, operation: F) -> Result<Fut::Output>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let _slot = self.acquire().await?;
        Ok(operation().await)
    }

    pub async fn execute_with_limit_cancellable<F, Fut>(
        &self,
        token: &CancellationToken,
        operation: F,
    ) -> Result<Fut::Output>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let _slot = self.acquire_cancellable(token).await?;
        Ok(operation().await)
    }

    fn record_wait(&self, waited: Duration) {
        let mut samples = self.wait_samples.lock();
        samples.push_back(waited);
        while samples.len() > self.config.wait_sample_window {
            samples.pop_front();
        }
    }

    /// Mean of the recent wait samples in milliseconds; 0.0 before any acquisition.
    ///
    /// Reporting only; admission never looks at it.
    pub fn get_lock_wait_time(&self) -> f64 {
        let samples = self.wait_samples.lock();
        if samples.is_empty() {
            return 0.0;
        }
        let total: Duration = samples.iter().sum();
        total.as_secs_f64() * 1000.0 / samples.len() as f64
    }

    pub fn last_wait_time(&self) -> Option<Duration> {
        self.wait_samples.lock().back().copied()
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Highest `active_count` observed since construction
    pub fn peak_active(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn config(&self) -> &ConcurrencyConfig {
        &self.config
    }
}
