use proptest::prelude::*;

/// Failure thresholds worth exercising
pub fn failure_threshold_strategy() -> impl Strategy<Value = u32> {
    1u32..=20
}

/// Priorities for a batch of enqueued items, duplicates included
pub fn priorities_strategy() -> impl Strategy<Value = Vec<i32>> {
    prop::collection::vec(-5i32..=5, 1..40)
}

/// Service names as they would appear in configuration
pub fn service_name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,30}"
}
