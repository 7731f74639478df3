//! # Retry Policy
//!
//! Bounded retries with exponential backoff. Retries are entirely call-scoped;
//! the policy itself holds no state between calls.

use crate::constants::{metrics as metric_names, tags as tag_keys};
use crate::error::{BoxError, ResilienceError};
use crate::resilience::metrics::{metric_tags, SharedMetricsSink, TracingMetricsSink};
use crate::resilience::RetryConfig;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Every attempt failed
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Carries the error from the final attempt
    #[error("Operation failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::RetriesExhausted { attempts, .. } => *attempts,
        }
    }

    pub fn last_error(&self) -> &E {
        match self {
            RetryError::RetriesExhausted { last_error, .. } => last_error,
        }
    }

    pub fn into_last_error(self) -> E {
        match self {
            RetryError::RetriesExhausted { last_error, .. } => last_error,
        }
    }
}

impl<E> From<RetryError<E>> for ResilienceError
where
    E: Into<BoxError>,
{
    fn from(error: RetryError<E>) -> Self {
        match error {
            RetryError::RetriesExhausted {
                attempts,
                last_error,
            } => ResilienceError::RetriesExhausted {
                attempts,
                source: last_error.into(),
            },
        }
    }
}

/// Retry with exponential backoff: attempt `i` (0-based) that fails is
/// followed by a delay of `initial_delay * backoff_factor^i`, except after
/// the final attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    sink: SharedMetricsSink,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> crate::Result<Self> {
        Self::with_metrics_sink(config, Arc::new(TracingMetricsSink))
    }

    pub fn with_metrics_sink(config: RetryConfig, sink: SharedMetricsSink) -> crate::Result<Self> {
        config
            .validate()
            .map_err(|reason| ResilienceError::Configuration(format!("retry policy: {reason}")))?;
        Ok(Self { config, sink })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Delay slept after the failed attempt with the given 0-based index
    pub fn delay_for_attempt(&self, attempt_index: u32) -> Duration {
        let exponent = i32::try_from(attempt_index).unwrap_or(i32::MAX);
        let seconds =
            self.config.initial_delay.as_secs_f64() * self.config.backoff_factor.powi(exponent);
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
    }

    /// Run `operation` until it succeeds or `max_attempts` is reached.
    ///
    /// Returns the first success immediately. On exhaustion the error from the
    /// last attempt is returned, not the first.
    pub async fn execute_with_retry<F, Fut, T, E>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.config.max_attempts;
        let mut attempt_index = 0;

        loop {
            let attempt = attempt_index + 1;
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt = attempt, "Operation succeeded after retry");
                    }
                    self.sink.record(
                        metric_names::RETRY_SUCCEEDED,
                        attempt as f64,
                        &metric_tags([(tag_keys::ATTEMPT, attempt.to_string())]),
                    );
                    return Ok(value);
                }
                Err(err) if attempt >= max_attempts => {
                    error!(
                        attempts = attempt,
                        error = %err,
                        "Operation failed, retries exhausted"
                    );
                    self.sink.record(
                        metric_names::RETRY_EXHAUSTED,
                        attempt as f64,
                        &metric_tags([(tag_keys::ATTEMPT, attempt.to_string())]),
                    );
                    return Err(RetryError::RetriesExhausted {
                        attempts: attempt,
                        last_error: err,
                    });
                }
                Err(err) => {
                    let delay = self.delay_for_attempt(attempt_index);
                    warn!(
                        attempt = attempt,
                        max_attempts = max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Operation failed, retrying"
                    );
                    self.sink.record(
                        metric_names::RETRY_ATTEMPT_FAILED,
                        attempt as f64,
                        &metric_tags([(tag_keys::ATTEMPT, attempt.to_string())]),
                    );
                    tokio::time::sleep(delay).await;
                    attempt_index += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            config: RetryConfig::default(),
            sink: Arc::new(TracingMetricsSink),
        }
    }
}
