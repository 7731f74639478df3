//! Builders for configurations used across the integration suites

use resilience_core::config::{CircuitBreakerComponentConfig, ResilienceConfig};
use resilience_core::resilience::{InMemoryMetricsSink, ResilienceManager};
use std::sync::Arc;

/// Configuration with no retry delay, no throttling and one configured service
pub struct TestConfigBuilder {
    config: ResilienceConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = ResilienceConfig::default();
        config.retry.max_attempts = 1;
        config.retry.initial_delay_seconds = 0.0;
        config.throttling.enabled = false;
        Self { config }
    }

    pub fn service(mut self, name: &str, failure_threshold: u32, timeout_seconds: u64) -> Self {
        self.config.circuit_breakers.component_configs.insert(
            name.to_string(),
            CircuitBreakerComponentConfig {
                failure_threshold,
                timeout_seconds,
            },
        );
        self
    }

    pub fn retry(mut self, max_attempts: u32, initial_delay_seconds: f64) -> Self {
        self.config.retry.max_attempts = max_attempts;
        self.config.retry.initial_delay_seconds = initial_delay_seconds;
        self
    }

    pub fn queue_capacity(mut self, max_size: usize) -> Self {
        self.config.queue.max_size = max_size;
        self
    }

    pub fn concurrency(mut self, max_concurrent: usize, lock_timeout_ms: u64) -> Self {
        self.config.concurrency.max_concurrent = max_concurrent;
        self.config.concurrency.lock_timeout_ms = lock_timeout_ms;
        self
    }

    pub fn build(self) -> ResilienceConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Manager wired to an in-memory metrics sink the test can inspect
pub async fn manager_with_sink(
    config: ResilienceConfig,
) -> (ResilienceManager, Arc<InMemoryMetricsSink>) {
    let sink = Arc::new(InMemoryMetricsSink::new());
    let manager = ResilienceManager::builder(config)
        .metrics_sink(sink.clone())
        .build()
        .await
        .expect("test configuration should be valid");
    (manager, sink)
}
