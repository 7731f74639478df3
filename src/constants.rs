//! # Constants
//!
//! Metric names, tag keys and default values shared by the resilience
//! components. Metric names are emitted through [`crate::resilience::MetricsSink`].

/// Metric names recorded on every state transition and operation outcome
pub mod metrics {
    // Circuit breaker
    pub const CIRCUIT_BREAKER_STATE_TRANSITION: &str = "circuit_breaker.state_transition";
    pub const CIRCUIT_BREAKER_REJECTED: &str = "circuit_breaker.rejected";
    pub const CIRCUIT_BREAKER_SUCCESS: &str = "circuit_breaker.success";
    pub const CIRCUIT_BREAKER_FAILURE: &str = "circuit_breaker.failure";

    // Retry policy
    pub const RETRY_ATTEMPT_FAILED: &str = "retry.attempt_failed";
    pub const RETRY_SUCCEEDED: &str = "retry.succeeded";
    pub const RETRY_EXHAUSTED: &str = "retry.exhausted";

    // Priority work queue
    pub const QUEUE_ENQUEUED: &str = "queue.enqueued";
    pub const QUEUE_REJECTED_FULL: &str = "queue.rejected_full";
    pub const QUEUE_DEQUEUED: &str = "queue.dequeued";
    pub const QUEUE_COMPLETED: &str = "queue.completed";
    pub const QUEUE_FAILED: &str = "queue.failed";

    // Concurrency limiter
    pub const LIMITER_ACQUIRED: &str = "concurrency.acquired";
    pub const LIMITER_WAIT_MS: &str = "concurrency.lock_wait_ms";
    pub const LIMITER_TIMEOUT: &str = "concurrency.timeout";
    pub const LIMITER_CANCELLED: &str = "concurrency.cancelled";
    pub const LIMITER_RELEASED: &str = "concurrency.released";

    // Throttle
    pub const THROTTLE_ALLOWED: &str = "throttle.allowed";
    pub const THROTTLE_REJECTED: &str = "throttle.rejected";

    // Manager
    pub const SUBMIT_COMPLETED: &str = "manager.submit_completed";
    pub const SUBMIT_QUEUED: &str = "manager.submit_queued";
    pub const SUBMIT_REJECTED: &str = "manager.submit_rejected";
}

/// Tag keys attached to metric records
pub mod tags {
    pub const SERVICE: &str = "service";
    pub const FROM_STATE: &str = "from";
    pub const TO_STATE: &str = "to";
    pub const QUEUE: &str = "queue";
    pub const PRIORITY: &str = "priority";
    pub const ATTEMPT: &str = "attempt";
    pub const REASON: &str = "reason";
}

/// Defaults used when a configuration section omits a value
pub mod defaults {
    pub const FAILURE_THRESHOLD: u32 = 5;
    pub const CIRCUIT_TIMEOUT_SECONDS: u64 = 60;
    pub const MAX_CIRCUIT_BREAKERS: usize = 50;

    pub const RETRY_MAX_ATTEMPTS: u32 = 3;
    pub const RETRY_INITIAL_DELAY_SECONDS: f64 = 1.0;
    pub const RETRY_BACKOFF_FACTOR: f64 = 2.0;

    pub const QUEUE_NAME: &str = "order_processing";
    pub const QUEUE_MAX_SIZE: usize = 1000;

    pub const MAX_CONCURRENT: usize = 10;
    pub const LOCK_TIMEOUT_MS: u64 = 50;
    pub const WAIT_SAMPLE_WINDOW: usize = 100;

    pub const THROTTLE_MAX_REQUESTS: usize = 100;
    pub const THROTTLE_WINDOW_SECONDS: f64 = 1.0;
}
