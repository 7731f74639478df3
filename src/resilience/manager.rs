//! # Resilience Manager
//!
//! Single entry point that composes the breakers, the retry policy, the
//! deferred work queue, the concurrency limiter and the request throttle.
//!
//! ```text
//! submit(service, op, payload, priority):
//!   throttled?          -> Rejected
//!   breaker denies?     -> enqueue, Queued(CircuitOpen)
//!   retry(op) succeeds  -> breaker success, Completed
//!   retry(op) exhausted -> breaker failure (once), enqueue, Queued(OperationFailed)
//! ```
//!
//! A breaker counts one outcome per outer call, however many retry attempts
//! ran inside it.

use crate::concurrency::{ConcurrencyLimiter, RequestThrottle, ThrottleDecision};
use crate::config::ResilienceConfig;
use crate::constants::{metrics as metric_names, tags as tag_keys};
use crate::error::{BoxError, ResilienceError, Result};
use crate::logging::{log_error, log_resilience_operation};
use crate::queue::{InMemoryQueueStore, PriorityWorkQueue, QueueItem, QueueStore};
use crate::resilience::metrics::{
    metric_tags, SharedMetricsSink, SystemCircuitBreakerMetrics, TracingMetricsSink,
};
use crate::resilience::{CircuitBreaker, CircuitBreakerError, CircuitBreakerMetrics, RetryPolicy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Result of [`ResilienceManager::submit`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome<T> {
    /// The operation ran and succeeded
    Completed(T),
    /// The work was preserved in the queue for later draining
    Queued { item_id: Uuid, reason: QueuedReason },
    /// Admission refused before the breaker or queue was consulted
    Rejected { reason: String },
}

impl<T> Outcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, Outcome::Queued { .. })
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn queued_item_id(&self) -> Option<Uuid> {
        match self {
            Outcome::Queued { item_id, .. } => Some(*item_id),
            _ => None,
        }
    }
}

/// Why a submission was queued instead of completed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuedReason {
    /// The breaker denied the call; the operation was not invoked
    CircuitOpen,
    /// Every retry attempt failed; `error` is the last one
    OperationFailed { attempts: u32, error: String },
}

/// Result of one [`ResilienceManager::drain_next`] step
#[derive(Debug, Clone, PartialEq)]
pub enum DrainOutcome<T> {
    /// Nothing waiting
    Idle,
    /// The breaker denied admission; nothing was dequeued
    Deferred,
    Completed { item_id: Uuid, value: T },
    Failed { item_id: Uuid, error: String },
}

/// Point-in-time health snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceHealth {
    pub timestamp: DateTime<Utc>,
    pub circuit_breakers: SystemCircuitBreakerMetrics,
    pub queue_size: usize,
    pub queue_in_flight: usize,
    pub active_operations: usize,
    pub peak_active_operations: usize,
    /// Mean of recent concurrency slot waits
    pub lock_wait_time_ms: f64,
    pub current_request_rate: usize,
    /// Share of healthy breakers, 0.0 to 1.0
    pub health_score: f64,
}

pub struct ResilienceManagerBuilder {
    config: ResilienceConfig,
    queue_store: Option<Arc<dyn QueueStore>>,
    metrics_sink: Option<SharedMetricsSink>,
}

impl ResilienceManagerBuilder {
    /// Persist queued work through `store`; pending items in it are restored on build
    pub fn queue_store(mut self, store: Arc<dyn QueueStore>) -> Self {
        self.queue_store = Some(store);
        self
    }

    pub fn metrics_sink(mut self, sink: SharedMetricsSink) -> Self {
        self.metrics_sink = Some(sink);
        self
    }

    pub async fn build(self) -> Result<ResilienceManager> {
        let config = self.config;
        config.validate()?;

        let sink = self
            .metrics_sink
            .unwrap_or_else(|| Arc::new(TracingMetricsSink));
        let store = self
            .queue_store
            .unwrap_or_else(|| Arc::new(InMemoryQueueStore::new()));

        let retry =
            RetryPolicy::with_metrics_sink(config.retry.to_resilience_config()?, sink.clone())?;
        let limiter = ConcurrencyLimiter::with_metrics_sink(
            config.concurrency.to_resilience_config(),
            sink.clone(),
        )?;
        let throttle = RequestThrottle::with_metrics_sink(
            config.throttling.to_resilience_config()?,
            sink.clone(),
        )?;
        let queue = PriorityWorkQueue::restore(
            config.queue.name.clone(),
            config.queue.max_size,
            store,
            sink.clone(),
        )
        .await?;

        let mut breakers = HashMap::new();
        if config.circuit_breakers.enabled {
            for (name, component) in &config.circuit_breakers.component_configs {
                let breaker = CircuitBreaker::with_metrics_sink(
                    name.clone(),
                    component.to_resilience_config(),
                    sink.clone(),
                )?;
                breakers.insert(name.clone(), Arc::new(breaker));
            }
        }

        info!(
            circuit_breakers_enabled = config.circuit_breakers.enabled,
            circuit_breakers = breakers.len(),
            queue = %config.queue.name,
            queue_max_size = config.queue.max_size,
            max_concurrent = config.concurrency.max_concurrent,
            throttling_enabled = config.throttling.enabled,
            "Resilience manager initialized"
        );

        Ok(ResilienceManager {
            config,
            circuit_breakers: Arc::new(RwLock::new(breakers)),
            retry,
            queue: Arc::new(queue),
            limiter: Arc::new(limiter),
            throttle: Arc::new(throttle),
            sink,
        })
    }
}

/// Owns one independent resilience domain; breakers are never shared between managers
#[derive(Debug, Clone)]
pub struct ResilienceManager {
    config: ResilienceConfig,
    circuit_breakers: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,
    retry: RetryPolicy,
    queue: Arc<PriorityWorkQueue>,
    limiter: Arc<ConcurrencyLimiter>,
    throttle: Arc<RequestThrottle>,
    sink: SharedMetricsSink,
}

impl ResilienceManager {
    pub fn builder(config: ResilienceConfig) -> ResilienceManagerBuilder {
        ResilienceManagerBuilder {
            config,
            queue_store: None,
            metrics_sink: None,
        }
    }

    /// In-memory queue and tracing metrics
    pub async fn from_config(config: ResilienceConfig) -> Result<Self> {
        Self::builder(config).build().await
    }

    /// Run `operation` for `service` with throttling, circuit breaking and
    /// retry, deferring the work to the queue when it cannot complete.
    ///
    /// `operation` is invoked once per retry attempt and never when the
    /// breaker denies the call. A full queue is the one condition that cannot
    /// degrade further and is returned as `QueueFull`.
    pub async fn submit<F, Fut, T, E>(
        &self,
        service: &str,
        operation: F,
        payload: serde_json::Value,
        priority: i32,
    ) -> Result<Outcome<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        if let ThrottleDecision::Throttled { current, window } = self.throttle.check() {
            self.record_submit(metric_names::SUBMIT_REJECTED, service);
            return Ok(Outcome::Rejected {
                reason: format!(
                    "request rate limit reached: {current} requests within {}ms",
                    window.as_millis()
                ),
            });
        }

        let attempt = match self.breaker_for(service).await? {
            Some(breaker) => {
                breaker
                    .execute(|| self.retry.execute_with_retry(operation))
                    .await
            }
            None => self
                .retry
                .execute_with_retry(operation)
                .await
                .map_err(CircuitBreakerError::OperationFailed),
        };

        let reason = match attempt {
            Ok(value) => {
                self.record_submit(metric_names::SUBMIT_COMPLETED, service);
                return Ok(Outcome::Completed(value));
            }
            Err(CircuitBreakerError::CircuitOpen { .. }) => QueuedReason::CircuitOpen,
            Err(CircuitBreakerError::OperationFailed(err)) => QueuedReason::OperationFailed {
                attempts: err.attempts(),
                error: err.last_error().to_string(),
            },
        };

        let item_id = self.defer(service, payload, priority).await?;

        warn!(
            service = %service,
            item_id = %item_id,
            priority = priority,
            reason = ?reason,
            "Operation deferred to queue"
        );
        self.record_submit(metric_names::SUBMIT_QUEUED, service);

        Ok(Outcome::Queued { item_id, reason })
    }

    async fn defer(&self, service: &str, payload: serde_json::Value, priority: i32) -> Result<Uuid> {
        match self.queue.enqueue(payload, priority).await {
            Ok(item_id) => Ok(item_id),
            Err(err) => {
                log_error(
                    "resilience_manager",
                    "submit",
                    &err.to_string(),
                    Some(service),
                );
                Err(err)
            }
        }
    }

    /// Take the next queued item and run it through `operation`.
    ///
    /// Meant to be called repeatedly by an external drain loop. Nothing is
    /// dequeued while the service's breaker denies admission.
    pub async fn drain_next<F, Fut, T, E>(
        &self,
        service: &str,
        mut operation: F,
    ) -> Result<DrainOutcome<T>>
    where
        F: FnMut(QueueItem) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        if self.queue.is_empty().await {
            return Ok(DrainOutcome::Idle);
        }

        let breaker = self.breaker_for(service).await?;
        if let Some(breaker) = &breaker {
            if !breaker.can_execute() {
                log_resilience_operation("drain", Some(service), None, "deferred", None);
                return Ok(DrainOutcome::Deferred);
            }
        }

        let Some(item) = self.queue.dequeue().await? else {
            return Ok(DrainOutcome::Idle);
        };
        let item_id = item.id;

        let started = Instant::now();
        let result = self
            .retry
            .execute_with_retry(|| operation(item.clone()))
            .await;
        let elapsed = started.elapsed();

        match result {
            Ok(value) => {
                if let Some(breaker) = &breaker {
                    breaker.record_success_manual(elapsed);
                }
                self.queue.mark_completed(item_id).await?;
                log_resilience_operation(
                    "drain",
                    Some(service),
                    Some(&item_id.to_string()),
                    "completed",
                    None,
                );
                Ok(DrainOutcome::Completed { item_id, value })
            }
            Err(err) => {
                if let Some(breaker) = &breaker {
                    breaker.record_failure_manual(elapsed);
                }
                let error = err.last_error().to_string();
                self.queue.mark_failed(item_id, error.clone()).await?;
                log_resilience_operation(
                    "drain",
                    Some(service),
                    Some(&item_id.to_string()),
                    "failed",
                    Some(&error),
                );
                Ok(DrainOutcome::Failed { item_id, error })
            }
        }
    }

    /// Breaker-guarded call with no retry and no queueing
    pub async fn execute_protected<F, Fut, T, E>(&self, service: &str, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<BoxError>,
    {
        match self.breaker_for(service).await? {
            Some(breaker) => Ok(breaker.execute(operation).await?),
            None => operation()
                .await
                .map_err(|err| ResilienceError::OperationFailed(err.into())),
        }
    }

    pub async fn execute_with_retry<F, Fut, T, E>(&self, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display + Into<BoxError>,
    {
        Ok(self.retry.execute_with_retry(operation).await?)
    }

    /// Run a critical section (e.g. a stock decrement) under the concurrency limit
    pub async fn execute_with_concurrency_control<F, Fut>(&self, operation: F) -> Result<Fut::Output>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        self.limiter.execute_with_limit(operation).await
    }

    pub async fn execute_with_concurrency_control_cancellable<F, Fut>(
        &self,
        token: &CancellationToken,
        operation: F,
    ) -> Result<Fut::Output>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        self.limiter
            .execute_with_limit_cancellable(token, operation)
            .await
    }

    /// Get or create circuit breaker for a service
    pub async fn get_circuit_breaker(&self, service: &str) -> Result<Arc<CircuitBreaker>> {
        {
            let breakers = self.circuit_breakers.read().await;
            if let Some(breaker) = breakers.get(service) {
                return Ok(Arc::clone(breaker));
            }
        }

        let mut breakers = self.circuit_breakers.write().await;

        // Double-check pattern (another task might have created it)
        if let Some(breaker) = breakers.get(service) {
            return Ok(Arc::clone(breaker));
        }

        if breakers.len() >= self.config.circuit_breakers.max_circuit_breakers {
            warn!(
                component = service,
                current_count = breakers.len(),
                max_allowed = self.config.circuit_breakers.max_circuit_breakers,
                "Maximum circuit breaker count exceeded, creating anyway"
            );
        }

        let component_config = self
            .config
            .circuit_breakers
            .config_for_component(service)
            .to_resilience_config();
        let breaker = Arc::new(CircuitBreaker::with_metrics_sink(
            service,
            component_config,
            self.sink.clone(),
        )?);
        breakers.insert(service.to_string(), Arc::clone(&breaker));

        info!(
            component = service,
            total_circuit_breakers = breakers.len(),
            "Created new circuit breaker"
        );

        Ok(breaker)
    }

    async fn breaker_for(&self, service: &str) -> Result<Option<Arc<CircuitBreaker>>> {
        if !self.config.circuit_breakers.enabled {
            return Ok(None);
        }
        self.get_circuit_breaker(service).await.map(Some)
    }

    /// Service names with a breaker, sorted
    pub async fn list_services(&self) -> Vec<String> {
        let breakers = self.circuit_breakers.read().await;
        let mut names: Vec<String> = breakers.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn get_service_metrics(&self, service: &str) -> Option<CircuitBreakerMetrics> {
        let breakers = self.circuit_breakers.read().await;
        breakers.get(service).map(|breaker| breaker.metrics())
    }

    pub async fn get_system_metrics(&self) -> SystemCircuitBreakerMetrics {
        let mut system_metrics = SystemCircuitBreakerMetrics::new();

        let breakers = self.circuit_breakers.read().await;
        for (name, breaker) in breakers.iter() {
            system_metrics.add_circuit_breaker(name.clone(), breaker.metrics());
        }

        system_metrics
    }

    /// Force open all circuit breakers (emergency stop)
    pub async fn force_open_all(&self) {
        warn!("Forcing all circuit breakers open (emergency stop)");

        let breakers = self.circuit_breakers.read().await;
        for breaker in breakers.values() {
            breaker.force_open();
        }
    }

    /// Force close all circuit breakers (emergency recovery)
    pub async fn force_close_all(&self) {
        warn!("Forcing all circuit breakers closed (emergency recovery)");

        let breakers = self.circuit_breakers.read().await;
        for breaker in breakers.values() {
            breaker.force_closed();
        }
    }

    pub async fn system_health_score(&self) -> f64 {
        self.get_system_metrics().await.health_score()
    }

    pub async fn health(&self) -> ResilienceHealth {
        let circuit_breakers = self.get_system_metrics().await;
        let health_score = circuit_breakers.health_score();

        ResilienceHealth {
            timestamp: Utc::now(),
            circuit_breakers,
            queue_size: self.queue.size().await,
            queue_in_flight: self.queue.in_flight().await,
            active_operations: self.limiter.active_count(),
            peak_active_operations: self.limiter.peak_active(),
            lock_wait_time_ms: self.limiter.get_lock_wait_time(),
            current_request_rate: self.throttle.current_rate(),
            health_score,
        }
    }

    /// Configuration validity per component
    pub async fn validate_all(&self) -> BTreeMap<String, bool> {
        let mut results = BTreeMap::new();

        {
            let breakers = self.circuit_breakers.read().await;
            for (name, breaker) in breakers.iter() {
                results.insert(
                    format!("circuit_breaker.{name}"),
                    CircuitBreaker::validate_config(breaker.config()),
                );
            }
        }

        results.insert("retry".to_string(), self.retry.config().validate().is_ok());
        results.insert("queue".to_string(), self.queue.max_size() > 0);
        results.insert(
            "concurrency".to_string(),
            self.limiter.config().validate().is_ok(),
        );
        results.insert(
            "throttling".to_string(),
            self.throttle.config().validate().is_ok(),
        );

        if results.values().any(|valid| !valid) {
            warn!(results = ?results, "Resilience component validation failed");
        }

        results
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<PriorityWorkQueue> {
        &self.queue
    }

    pub fn limiter(&self) -> &Arc<ConcurrencyLimiter> {
        &self.limiter
    }

    pub fn throttle(&self) -> &Arc<RequestThrottle> {
        &self.throttle
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn record_submit(&self, metric: &str, service: &str) {
        self.sink.record(
            metric,
            1.0,
            &metric_tags([(tag_keys::SERVICE, service.to_string())]),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerComponentConfig;
    use serde_json::json;

    fn fast_config() -> ResilienceConfig {
        let mut config = ResilienceConfig::default();
        config.retry.max_attempts = 1;
        config.retry.initial_delay_seconds = 0.0;
        config.circuit_breakers.component_configs.insert(
            "payment_service".to_string(),
            CircuitBreakerComponentConfig {
                failure_threshold: 2,
                timeout_seconds: 60,
            },
        );
        config
    }

    #[tokio::test]
    async fn test_configured_breakers_created_up_front() {
        let manager = ResilienceManager::from_config(fast_config()).await.unwrap();
        assert_eq!(manager.list_services().await, vec!["payment_service".to_string()]);

        let breaker = manager.get_circuit_breaker("payment_service").await.unwrap();
        assert_eq!(breaker.config().failure_threshold, 2);

        manager.get_circuit_breaker("inventory_service").await.unwrap();
        assert_eq!(manager.list_services().await.len(), 2);
    }

    #[tokio::test]
    async fn test_throttled_submission_rejected() {
        let mut config = fast_config();
        config.throttling.max_requests = 1;
        config.throttling.window_seconds = 60.0;
        let manager = ResilienceManager::from_config(config).await.unwrap();

        let first = manager
            .submit("payment_service", || async { Ok::<_, String>(1) }, json!({}), 1)
            .await
            .unwrap();
        assert!(first.is_completed());

        let second = manager
            .submit("payment_service", || async { Ok::<_, String>(2) }, json!({}), 1)
            .await
            .unwrap();
        assert!(matches!(second, Outcome::Rejected { .. }));
        assert!(manager.queue().is_empty().await);
    }

    #[tokio::test]
    async fn test_disabled_breakers_still_queue_on_failure() {
        let mut config = fast_config();
        config.circuit_breakers.enabled = false;
        let manager = ResilienceManager::from_config(config).await.unwrap();
        assert!(manager.list_services().await.is_empty());

        for _ in 0..3 {
            let outcome = manager
                .submit(
                    "payment_service",
                    || async { Err::<(), _>("gateway down") },
                    json!({"order_id": 1}),
                    1,
                )
                .await
                .unwrap();
            assert!(matches!(
                outcome,
                Outcome::Queued {
                    reason: QueuedReason::OperationFailed { attempts: 1, .. },
                    ..
                }
            ));
        }
        assert_eq!(manager.queue().size().await, 3);
    }

    #[tokio::test]
    async fn test_validate_all_reports_components() {
        let manager = ResilienceManager::from_config(fast_config()).await.unwrap();
        let results = manager.validate_all().await;
        assert_eq!(results.get("circuit_breaker.payment_service"), Some(&true));
        assert_eq!(results.get("retry"), Some(&true));
        assert_eq!(results.get("concurrency"), Some(&true));
        assert!(results.values().all(|valid| *valid));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_at_build() {
        let mut config = fast_config();
        config.queue.max_size = 0;
        let err = ResilienceManager::from_config(config).await.unwrap_err();
        assert!(matches!(err, ResilienceError::Configuration(_)));
    }
}
