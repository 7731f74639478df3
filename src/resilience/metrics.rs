//! # Resilience Metrics
//!
//! Two halves: the [`MetricsSink`] trait through which every component reports
//! state transitions and operation outcomes, and the snapshot types used for
//! health reporting ([`CircuitBreakerMetrics`], [`SystemCircuitBreakerMetrics`]).

use crate::resilience::CircuitState;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// Tags attached to a single metric record
pub type MetricTags = BTreeMap<String, String>;

/// Build a [`MetricTags`] map from string pairs
pub fn metric_tags<const N: usize>(pairs: [(&str, String); N]) -> MetricTags {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// Metrics collection trait for integration with monitoring systems
pub trait MetricsSink: Send + Sync + std::fmt::Debug {
    /// Record a single observation
    fn record(&self, name: &str, value: f64, tags: &MetricTags);
}

/// Shared handle passed to every component
pub type SharedMetricsSink = Arc<dyn MetricsSink>;

/// Default sink: one `tracing` debug event per record
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn record(&self, name: &str, value: f64, tags: &MetricTags) {
        tracing::debug!(
            metric = name,
            value = value,
            tags = ?tags,
            "Resilience metric"
        );
    }
}

/// Discards every record
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record(&self, _name: &str, _value: f64, _tags: &MetricTags) {}
}

/// A retained metric observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub name: String,
    pub value: f64,
    pub tags: MetricTags,
    pub recorded_at: DateTime<Utc>,
}

/// Keeps every record in memory for inspection in tests and diagnostics
#[derive(Debug, Default)]
pub struct InMemoryMetricsSink {
    records: Mutex<Vec<MetricRecord>>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records with the given name
    pub fn count(&self, name: &str) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|record| record.name == name)
            .count()
    }

    /// Copies of every record with the given name, in recording order
    pub fn records_named(&self, name: &str) -> Vec<MetricRecord> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.name == name)
            .cloned()
            .collect()
    }

    pub fn records(&self) -> Vec<MetricRecord> {
        self.records.lock().clone()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl MetricsSink for InMemoryMetricsSink {
    fn record(&self, name: &str, value: f64, tags: &MetricTags) {
        self.records.lock().push(MetricRecord {
            name: name.to_string(),
            value,
            tags: tags.clone(),
            recorded_at: Utc::now(),
        });
    }
}

/// Metrics for a single circuit breaker instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Total number of operations executed through the breaker
    pub total_calls: u64,

    /// Number of successful calls
    pub success_count: u64,

    /// Number of failed calls
    pub failure_count: u64,

    /// Calls denied without invoking the operation
    pub rejected_count: u64,

    /// Current consecutive failure count
    pub consecutive_failures: u64,

    /// Current circuit breaker state
    pub current_state: CircuitState,

    /// Calculated failure rate (0.0 to 1.0)
    pub failure_rate: f64,

    /// Calculated success rate (0.0 to 1.0)
    pub success_rate: f64,

    /// Average operation duration
    pub average_duration: Duration,
}

impl CircuitBreakerMetrics {
    /// Create new metrics instance with zero values
    pub fn new() -> Self {
        Self {
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            rejected_count: 0,
            consecutive_failures: 0,
            current_state: CircuitState::Closed,
            failure_rate: 0.0,
            success_rate: 0.0,
            average_duration: Duration::ZERO,
        }
    }

    /// Check if metrics indicate healthy operation
    pub fn is_healthy(&self) -> bool {
        match self.current_state {
            CircuitState::Closed => self.failure_rate < 0.1,
            CircuitState::Open => false,
            CircuitState::HalfOpen => true,
        }
    }

    /// Get human-readable state description
    pub fn state_description(&self) -> &'static str {
        match self.current_state {
            CircuitState::Closed => "Healthy - Normal operation",
            CircuitState::Open => "Failing - Rejecting all calls",
            CircuitState::HalfOpen => "Recovering - Probing dependency",
        }
    }

    /// Format metrics for logging
    pub fn format_summary(&self) -> String {
        format!(
            "State: {} | Calls: {} | Success: {:.1}% | Failures: {} | Rejected: {} | Avg Duration: {}ms",
            self.state_description(),
            self.total_calls,
            self.success_rate * 100.0,
            self.failure_count,
            self.rejected_count,
            self.average_duration.as_millis()
        )
    }
}

impl Default for CircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// System-wide circuit breaker metrics aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemCircuitBreakerMetrics {
    /// Metrics for individual circuit breakers by service name
    pub circuit_breakers: HashMap<String, CircuitBreakerMetrics>,

    /// Timestamp of last metrics collection
    pub collected_at: DateTime<Utc>,
}

impl SystemCircuitBreakerMetrics {
    pub fn new() -> Self {
        Self {
            circuit_breakers: HashMap::new(),
            collected_at: Utc::now(),
        }
    }

    /// Add metrics for a circuit breaker
    pub fn add_circuit_breaker(&mut self, name: String, metrics: CircuitBreakerMetrics) {
        self.circuit_breakers.insert(name, metrics);
        self.collected_at = Utc::now();
    }

    /// Get count of circuit breakers by state
    pub fn count_by_state(&self) -> HashMap<CircuitState, usize> {
        let mut counts = HashMap::new();

        for metrics in self.circuit_breakers.values() {
            *counts.entry(metrics.current_state).or_insert(0) += 1;
        }

        counts
    }

    /// Get list of unhealthy circuit breakers
    pub fn unhealthy_circuits(&self) -> Vec<(&String, &CircuitBreakerMetrics)> {
        self.circuit_breakers
            .iter()
            .filter(|(_, metrics)| !metrics.is_healthy())
            .collect()
    }

    /// Calculate system-wide health score (0.0 to 1.0)
    pub fn health_score(&self) -> f64 {
        if self.circuit_breakers.is_empty() {
            return 1.0;
        }

        let healthy_count = self
            .circuit_breakers
            .values()
            .filter(|metrics| metrics.is_healthy())
            .count();

        healthy_count as f64 / self.circuit_breakers.len() as f64
    }

    pub fn total_calls(&self) -> u64 {
        self.circuit_breakers.values().map(|m| m.total_calls).sum()
    }

    pub fn total_failures(&self) -> u64 {
        self.circuit_breakers.values().map(|m| m.failure_count).sum()
    }

    /// Get system-wide failure rate
    pub fn system_failure_rate(&self) -> f64 {
        let total_calls = self.total_calls();
        if total_calls == 0 {
            return 0.0;
        }

        self.total_failures() as f64 / total_calls as f64
    }

    /// Format summary for logging
    pub fn format_summary(&self) -> String {
        let state_counts = self.count_by_state();
        let closed_count = state_counts.get(&CircuitState::Closed).unwrap_or(&0);
        let open_count = state_counts.get(&CircuitState::Open).unwrap_or(&0);
        let half_open_count = state_counts.get(&CircuitState::HalfOpen).unwrap_or(&0);

        format!(
            "Circuit Breakers: {} total | {} closed | {} open | {} half-open | Health: {:.1}% | System failure rate: {:.2}%",
            self.circuit_breakers.len(),
            closed_count,
            open_count,
            half_open_count,
            self.health_score() * 100.0,
            self.system_failure_rate() * 100.0
        )
    }
}

impl Default for SystemCircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
