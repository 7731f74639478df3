//! # Admission Control
//!
//! [`ConcurrencyLimiter`] bounds how many callers run a critical section at
//! once; [`RequestThrottle`] bounds how many requests are admitted per window.

pub mod limiter;
pub mod throttle;

pub use limiter::{ConcurrencyConfig, ConcurrencyLimiter, SlotGuard};
pub use throttle::{RequestThrottle, ThrottleConfig, ThrottleDecision};
