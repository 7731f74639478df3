#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Resilience Core
//!
//! Fault-tolerance and flow-control primitives for calling an unreliable
//! downstream dependency (e.g. a payment processor) without losing work.
//!
//! ## Overview
//!
//! Four components, composed by a coordinating manager:
//!
//! - [`CircuitBreaker`] - per-dependency Closed / Open / Half-Open state machine
//! - [`RetryPolicy`] - bounded retries with exponential backoff
//! - [`PriorityWorkQueue`] - bounded priority queue of deferred work with a pluggable store
//! - [`ConcurrencyLimiter`] - caps simultaneous executions of a critical section
//!
//! [`ResilienceManager`] is the single entry point. When a dependency is
//! unhealthy, new work is queued rather than attempted, and an external drain
//! loop feeds it back through [`ResilienceManager::drain_next`].
//!
//! ## Module Organization
//!
//! - [`resilience`] - Circuit breakers, retry, metrics and the manager
//! - [`queue`] - Priority work queue and queue store
//! - [`concurrency`] - Concurrency limiter and request throttle
//! - [`config`] - Layered TOML / environment configuration
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use resilience_core::config::ResilienceConfig;
//! use resilience_core::resilience::{Outcome, ResilienceManager};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! resilience_core::logging::init_structured_logging();
//!
//! let manager = ResilienceManager::from_config(ResilienceConfig::default()).await?;
//!
//! let outcome = manager
//!     .submit(
//!         "payment_service",
//!         || async { Ok::<_, std::io::Error>("charged") },
//!         json!({ "order_id": 1001 }),
//!         5,
//!     )
//!     .await?;
//!
//! match outcome {
//!     Outcome::Completed(receipt) => println!("payment {receipt}"),
//!     Outcome::Queued { item_id, .. } => println!("deferred as {item_id}"),
//!     Outcome::Rejected { reason } => println!("rejected: {reason}"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod concurrency;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod queue;
pub mod resilience;

pub use concurrency::{ConcurrencyLimiter, RequestThrottle};
pub use config::{ConfigManager, ResilienceConfig};
pub use error::{ResilienceError, ResilienceErrorKind, Result};
pub use queue::{PriorityWorkQueue, QueueItem, QueueStore};
pub use resilience::{CircuitBreaker, Outcome, ResilienceManager, RetryPolicy};
