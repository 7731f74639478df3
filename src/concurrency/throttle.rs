//! Sliding-window request throttling

use crate::constants::{defaults, metrics as metric_names};
use crate::error::{ResilienceError, Result};
use crate::resilience::metrics::{MetricTags, SharedMetricsSink, TracingMetricsSink};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Disabled throttles admit everything and record nothing
    pub enabled: bool,
    pub max_requests: usize,
    pub window: Duration,
}

impl ThrottleConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        if self.max_requests == 0 {
            return Err("max_requests must be greater than 0".to_string());
        }
        if self.window.is_zero() {
            return Err("window must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: defaults::THROTTLE_MAX_REQUESTS,
            window: Duration::from_secs_f64(defaults::THROTTLE_WINDOW_SECONDS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Admitted; `current` includes this request
    Allowed { current: usize },
    /// Refused; the window already holds `current` requests
    Throttled { current: usize, window: Duration },
}

impl ThrottleDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ThrottleDecision::Allowed { .. })
    }
}

#[derive(Debug)]
pub struct RequestThrottle {
    config: ThrottleConfig,
    requests: Mutex<VecDeque<Instant>>,
    sink: SharedMetricsSink,
}

impl RequestThrottle {
    pub fn new(config: ThrottleConfig) -> Result<Self> {
        Self::with_metrics_sink(config, Arc::new(TracingMetricsSink))
    }

    pub fn with_metrics_sink(config: ThrottleConfig, sink: SharedMetricsSink) -> Result<Self> {
        config
            .validate()
            .map_err(|reason| ResilienceError::Configuration(format!("request throttle: {reason}")))?;
        Ok(Self {
            config,
            requests: Mutex::new(VecDeque::new()),
            sink,
        })
    }

    /// Admit or refuse one request, recording it when admitted
    pub fn check(&self) -> ThrottleDecision {
        if !self.config.enabled {
            return ThrottleDecision::Allowed { current: 0 };
        }

        let now = Instant::now();
        let decision = {
            let mut requests = self.requests.lock();
            Self::prune(&mut requests, now, self.config.window);

            if requests.len() < self.config.max_requests {
                requests.push_back(now);
                ThrottleDecision::Allowed {
                    current: requests.len(),
                }
            } else {
                ThrottleDecision::Throttled {
                    current: requests.len(),
                    window: self.config.window,
                }
            }
        };

        match decision {
            ThrottleDecision::Allowed { current } => {
                self.sink
                    .record(metric_names::THROTTLE_ALLOWED, current as f64, &MetricTags::new());
            }
            ThrottleDecision::Throttled { current, .. } => {
                warn!(
                    current = current,
                    max_requests = self.config.max_requests,
                    window_ms = self.config.window.as_millis() as u64,
                    "Request throttled"
                );
                self.sink
                    .record(metric_names::THROTTLE_REJECTED, current as f64, &MetricTags::new());
            }
        }

        decision
    }

    /// Requests admitted within the current window
    pub fn current_rate(&self) -> usize {
        let mut requests = self.requests.lock();
        Self::prune(&mut requests, Instant::now(), self.config.window);
        requests.len()
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    fn prune(requests: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = requests.front() {
            if now.duration_since(*oldest) >= window {
                requests.pop_front();
            } else {
                break;
            }
        }
    }
}
