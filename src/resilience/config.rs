//! # Runtime Resilience Configuration
//!
//! Duration-based configuration consumed directly by [`CircuitBreaker`] and
//! [`RetryPolicy`]. For file-based configuration use `crate::config`, whose
//! sections convert into these types via `to_resilience_config()`.
//!
//! [`CircuitBreaker`]: crate::resilience::CircuitBreaker
//! [`RetryPolicy`]: crate::resilience::RetryPolicy

use crate::constants::defaults;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single circuit breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,

    /// Time to wait in open state before admitting a probe
    pub timeout: Duration,
}

impl CircuitBreakerConfig {
    /// Configuration for payment processors and similar external APIs
    pub fn for_external_api() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
        }
    }

    /// Configuration for in-house dependencies that recover quickly
    pub fn for_internal_service() -> Self {
        Self {
            failure_threshold: 3,
            timeout: Duration::from_secs(15),
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }

        if self.timeout.is_zero() {
            return Err("timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: defaults::FAILURE_THRESHOLD,
            timeout: Duration::from_secs(defaults::CIRCUIT_TIMEOUT_SECONDS),
        }
    }
}

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first; at least 1
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub initial_delay: Duration,

    /// Multiplier applied per attempt index
    pub backoff_factor: f64,
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }

        if !self.backoff_factor.is_finite() || self.backoff_factor <= 0.0 {
            return Err("backoff_factor must be a finite number greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::RETRY_MAX_ATTEMPTS,
            initial_delay: Duration::from_secs_f64(defaults::RETRY_INITIAL_DELAY_SECONDS),
            backoff_factor: defaults::RETRY_BACKOFF_FACTOR,
        }
    }
}
