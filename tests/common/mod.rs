#![allow(dead_code)]

pub mod builders;
pub mod strategies;

pub use builders::*;
pub use strategies::*;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Error returned by test operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TestError(pub String);

impl TestError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Operation that fails a fixed number of times before succeeding, counting
/// every invocation
#[derive(Debug, Clone)]
pub struct FlakyOperation {
    invocations: Arc<AtomicU32>,
    failures_before_success: u32,
}

impl FlakyOperation {
    pub fn new(failures_before_success: u32) -> Self {
        Self {
            invocations: Arc::new(AtomicU32::new(0)),
            failures_before_success,
        }
    }

    pub fn always_failing() -> Self {
        Self::new(u32::MAX)
    }

    pub fn invocations(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }

    /// One invocation; the returned future owns everything it needs
    pub fn call(&self) -> impl std::future::Future<Output = Result<&'static str, TestError>> {
        let attempt = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;
        let fail = attempt <= self.failures_before_success;
        async move {
            if fail {
                Err(TestError::new(format!("payment gateway timeout (attempt {attempt})")))
            } else {
                Ok("charged")
            }
        }
    }
}

/// Install a test subscriber once; later calls are no-ops
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("resilience_core=debug")
        .with_test_writer()
        .try_init();
}
