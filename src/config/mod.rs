//! # Resilience Configuration
//!
//! File-shaped configuration for every resilience component. Values here use
//! plain numbers (seconds, milliseconds) so they read naturally in TOML; each
//! section converts into the runtime configuration its component consumes via
//! `to_resilience_config()`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use resilience_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load_from_file("config/resilience.toml")?;
//! let retry = manager.config().retry.to_resilience_config()?;
//! println!("retrying up to {} times", retry.max_attempts);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::concurrency::{ConcurrencyConfig, ThrottleConfig};
use crate::constants::defaults;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `config/resilience.toml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub circuit_breakers: CircuitBreakerConfig,
    pub retry: RetrySettings,
    pub queue: QueueSettings,
    pub concurrency: ConcurrencySettings,
    pub throttling: ThrottlingSettings,
}

impl ResilienceConfig {
    /// Validate every section, reporting the first offending field
    pub fn validate(&self) -> ConfigResult<()> {
        self.circuit_breakers.validate()?;
        self.retry.validate()?;
        self.queue.validate()?;
        self.concurrency.validate()?;
        self.throttling.validate()?;
        Ok(())
    }
}

/// Circuit breaker configuration with per-component overrides
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// When false the manager never consults a breaker before calling
    pub enabled: bool,

    /// Soft ceiling on lazily created breakers; exceeding it only warns
    pub max_circuit_breakers: usize,

    /// Configuration for services without an explicit entry
    pub default_config: CircuitBreakerComponentConfig,

    /// Named services; a breaker is created for each at manager construction
    pub component_configs: HashMap<String, CircuitBreakerComponentConfig>,
}

impl CircuitBreakerConfig {
    /// Get configuration for a specific component
    pub fn config_for_component(&self, component_name: &str) -> CircuitBreakerComponentConfig {
        self.component_configs
            .get(component_name)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone())
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.max_circuit_breakers == 0 {
            return Err(ConfigurationError::validation(
                "circuit_breakers.max_circuit_breakers",
                "must be greater than 0",
            ));
        }

        self.default_config
            .validate("circuit_breakers.default_config")?;

        for (name, component) in &self.component_configs {
            component.validate(&format!("circuit_breakers.component_configs.{name}"))?;
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_circuit_breakers: defaults::MAX_CIRCUIT_BREAKERS,
            default_config: CircuitBreakerComponentConfig::default(),
            component_configs: HashMap::new(),
        }
    }
}

/// Thresholds for one protected dependency
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerComponentConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

impl CircuitBreakerComponentConfig {
    /// Convert to the resilience module's runtime format
    pub fn to_resilience_config(&self) -> crate::resilience::CircuitBreakerConfig {
        crate::resilience::CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            timeout: Duration::from_secs(self.timeout_seconds),
        }
    }

    fn validate(&self, path: &str) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigurationError::validation(
                format!("{path}.failure_threshold"),
                "must be greater than 0",
            ));
        }
        if self.timeout_seconds == 0 {
            return Err(ConfigurationError::validation(
                format!("{path}.timeout_seconds"),
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for CircuitBreakerComponentConfig {
    fn default() -> Self {
        Self {
            failure_threshold: defaults::FAILURE_THRESHOLD,
            timeout_seconds: defaults::CIRCUIT_TIMEOUT_SECONDS,
        }
    }
}

/// Retry with exponential backoff
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_seconds: f64,
    pub backoff_factor: f64,
}

impl RetrySettings {
    pub fn to_resilience_config(&self) -> ConfigResult<crate::resilience::RetryConfig> {
        self.validate()?;
        let initial_delay = Duration::try_from_secs_f64(self.initial_delay_seconds).map_err(|e| {
            ConfigurationError::validation("retry.initial_delay_seconds", e.to_string())
        })?;

        Ok(crate::resilience::RetryConfig {
            max_attempts: self.max_attempts,
            initial_delay,
            backoff_factor: self.backoff_factor,
        })
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigurationError::validation(
                "retry.max_attempts",
                "must be at least 1",
            ));
        }
        if !self.initial_delay_seconds.is_finite() || self.initial_delay_seconds < 0.0 {
            return Err(ConfigurationError::validation(
                "retry.initial_delay_seconds",
                "must be a finite, non-negative number of seconds",
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor <= 0.0 {
            return Err(ConfigurationError::validation(
                "retry.backoff_factor",
                "must be a finite number greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: defaults::RETRY_MAX_ATTEMPTS,
            initial_delay_seconds: defaults::RETRY_INITIAL_DELAY_SECONDS,
            backoff_factor: defaults::RETRY_BACKOFF_FACTOR,
        }
    }
}

/// Deferred work queue
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueSettings {
    pub name: String,
    pub max_size: usize,
}

impl QueueSettings {
    fn validate(&self) -> ConfigResult<()> {
        if self.max_size == 0 {
            return Err(ConfigurationError::validation(
                "queue.max_size",
                "must be greater than 0",
            ));
        }
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::validation(
                "queue.name",
                "must not be empty",
            ));
        }
        Ok(())
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            name: defaults::QUEUE_NAME.to_string(),
            max_size: defaults::QUEUE_MAX_SIZE,
        }
    }
}

/// Concurrency limiting for critical sections such as stock decrements
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConcurrencySettings {
    pub max_concurrent: usize,
    pub lock_timeout_ms: u64,
    /// Number of recent wait-time samples kept for `get_lock_wait_time`
    pub wait_sample_window: usize,
}

impl ConcurrencySettings {
    pub fn to_resilience_config(&self) -> ConcurrencyConfig {
        ConcurrencyConfig {
            max_concurrent: self.max_concurrent,
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            wait_sample_window: self.wait_sample_window,
        }
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.max_concurrent == 0 {
            return Err(ConfigurationError::validation(
                "concurrency.max_concurrent",
                "must be greater than 0",
            ));
        }
        if self.lock_timeout_ms == 0 {
            return Err(ConfigurationError::validation(
                "concurrency.lock_timeout_ms",
                "must be greater than 0",
            ));
        }
        if self.wait_sample_window == 0 {
            return Err(ConfigurationError::validation(
                "concurrency.wait_sample_window",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::MAX_CONCURRENT,
            lock_timeout_ms: defaults::LOCK_TIMEOUT_MS,
            wait_sample_window: defaults::WAIT_SAMPLE_WINDOW,
        }
    }
}

/// Sliding-window request throttling
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ThrottlingSettings {
    pub enabled: bool,
    pub max_requests: usize,
    pub window_seconds: f64,
}

impl ThrottlingSettings {
    pub fn to_resilience_config(&self) -> ConfigResult<ThrottleConfig> {
        self.validate()?;
        let window = Duration::try_from_secs_f64(self.window_seconds).map_err(|e| {
            ConfigurationError::validation("throttling.window_seconds", e.to_string())
        })?;

        Ok(ThrottleConfig {
            enabled: self.enabled,
            max_requests: self.max_requests,
            window,
        })
    }

    fn validate(&self) -> ConfigResult<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.max_requests == 0 {
            return Err(ConfigurationError::validation(
                "throttling.max_requests",
                "must be greater than 0 when throttling is enabled",
            ));
        }
        if !self.window_seconds.is_finite() || self.window_seconds <= 0.0 {
            return Err(ConfigurationError::validation(
                "throttling.window_seconds",
                "must be a finite number greater than 0 when throttling is enabled",
            ));
        }
        Ok(())
    }
}

impl Default for ThrottlingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: defaults::THROTTLE_MAX_REQUESTS,
            window_seconds: defaults::THROTTLE_WINDOW_SECONDS,
        }
    }
}
