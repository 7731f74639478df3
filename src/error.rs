//! # Error Types
//!
//! Crate-level error taxonomy. Components that run a caller-supplied operation
//! keep the caller's error type (`CircuitBreakerError<E>`, `RetryError<E>`);
//! both collapse into [`ResilienceError`] with `?` at the manager boundary.

use crate::config::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Boxed error used wherever an operation's own error type is erased
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum ResilienceError {
    /// The breaker denied the call; the operation was never invoked
    #[error("Circuit breaker is open for {service}")]
    CircuitOpen { service: String },

    /// Every attempt failed; carries the last observed error
    #[error("Operation failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: BoxError,
    },

    /// Admission refused because the queue is at capacity
    #[error("Queue '{queue}' is full (capacity {capacity})")]
    QueueFull { queue: String, capacity: usize },

    /// No concurrency slot became free within the lock timeout
    #[error("Timed out after {waited:?} waiting for one of {max_concurrent} concurrency slots")]
    ConcurrencyLimit {
        max_concurrent: usize,
        waited: Duration,
    },

    /// The caller cancelled while waiting for a concurrency slot
    #[error("Cancelled while waiting for a concurrency slot")]
    Cancelled,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The protected operation failed (single attempt, no retry involved)
    #[error("Operation failed: {0}")]
    OperationFailed(#[source] BoxError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Queue store error: {0}")]
    Store(String),
}

/// Stable classification of [`ResilienceError`] for outer layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResilienceErrorKind {
    CircuitOpen,
    RetriesExhausted,
    QueueFull,
    ConcurrencyLimit,
    Cancelled,
    InvalidState,
    OperationFailed,
    Configuration,
    Store,
}

impl ResilienceError {
    pub fn kind(&self) -> ResilienceErrorKind {
        match self {
            ResilienceError::CircuitOpen { .. } => ResilienceErrorKind::CircuitOpen,
            ResilienceError::RetriesExhausted { .. } => ResilienceErrorKind::RetriesExhausted,
            ResilienceError::QueueFull { .. } => ResilienceErrorKind::QueueFull,
            ResilienceError::ConcurrencyLimit { .. } => ResilienceErrorKind::ConcurrencyLimit,
            ResilienceError::Cancelled => ResilienceErrorKind::Cancelled,
            ResilienceError::InvalidState(_) => ResilienceErrorKind::InvalidState,
            ResilienceError::OperationFailed(_) => ResilienceErrorKind::OperationFailed,
            ResilienceError::Configuration(_) => ResilienceErrorKind::Configuration,
            ResilienceError::Store(_) => ResilienceErrorKind::Store,
        }
    }

    /// Whether a caller at a higher level may reasonably try again later.
    ///
    /// Neither the breaker nor the limiter retries internally.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ResilienceError::CircuitOpen { .. } | ResilienceError::ConcurrencyLimit { .. }
        )
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        ResilienceError::InvalidState(message.into())
    }

    pub fn store(message: impl Into<String>) -> Self {
        ResilienceError::Store(message.into())
    }
}

impl From<ConfigurationError> for ResilienceError {
    fn from(error: ConfigurationError) -> Self {
        ResilienceError::Configuration(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ResilienceError>;
