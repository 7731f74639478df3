//! # Resilience Module
//!
//! Fault tolerance for calls to unreliable dependencies such as a payment
//! processor: per-service circuit breakers, bounded retry with exponential
//! backoff, and a [`ResilienceManager`] that falls back to queueing work when a
//! dependency is unhealthy.
//!
//! ## Architecture
//!
//! - **Circuit Breakers**: Fail fast once a dependency crosses its failure threshold
//! - **Retry Policy**: Absorb transient failures inside a single breaker-guarded call
//! - **Metrics**: Every transition and outcome is reported through a [`MetricsSink`]
//! - **Manager**: Owns the breakers, queue, limiter and throttle of one resilience domain
//!
//! ## Usage
//!
//! ```rust,no_run
//! use resilience_core::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CircuitBreakerConfig {
//!     failure_threshold: 5,
//!     timeout: Duration::from_secs(60),
//! };
//!
//! let circuit_breaker = CircuitBreaker::new("payment_service", config)?;
//!
//! let receipt = circuit_breaker
//!     .execute(|| async { Ok::<&str, std::io::Error>("charged") })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod manager;
pub mod metrics;
pub mod retry;


pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use config::{CircuitBreakerConfig, RetryConfig};
pub use manager::{
    DrainOutcome, Outcome, QueuedReason, ResilienceHealth, ResilienceManager,
    ResilienceManagerBuilder,
};
pub use metrics::{
    CircuitBreakerMetrics, InMemoryMetricsSink, MetricRecord, MetricTags, MetricsSink,
    NoopMetricsSink, SharedMetricsSink, SystemCircuitBreakerMetrics, TracingMetricsSink,
};
pub use retry::{RetryError, RetryPolicy};
