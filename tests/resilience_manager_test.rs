//! End-to-end behaviour of the resilience manager

mod common;

use common::{init_test_logging, manager_with_sink, FlakyOperation, TestConfigBuilder, TestError};
use resilience_core::constants::{metrics as metric_names, tags as tag_keys};
use resilience_core::queue::{InMemoryQueueStore, QueueItem};
use resilience_core::resilience::{
    CircuitState, DrainOutcome, Outcome, QueuedReason, ResilienceManager,
};
use resilience_core::{ResilienceError, ResilienceErrorKind};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_degrades_to_queue_once_breaker_opens() {
    init_test_logging();
    let config = TestConfigBuilder::new().service("payment_service", 3, 60).build();
    let (manager, sink) = manager_with_sink(config).await;
    let operation = FlakyOperation::always_failing();

    for order_id in 0..3 {
        let outcome = manager
            .submit(
                "payment_service",
                || operation.call(),
                json!({ "order_id": order_id }),
                1,
            )
            .await
            .unwrap();
        match outcome {
            Outcome::Queued {
                reason: QueuedReason::OperationFailed { attempts, error },
                ..
            } => {
                assert_eq!(attempts, 1);
                assert!(error.starts_with("payment gateway timeout"));
            }
            other => panic!("expected failure to be queued, got {other:?}"),
        }
    }

    let breaker = manager.get_circuit_breaker("payment_service").await.unwrap();
    assert_eq!(breaker.state(), CircuitState::Open);
    // Each failed attempt was deferred as well
    let size_before = manager.queue().size().await;
    assert_eq!(size_before, 3);

    let outcome = manager
        .submit(
            "payment_service",
            || operation.call(),
            json!({ "order_id": 3 }),
            5,
        )
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        Outcome::Queued {
            reason: QueuedReason::CircuitOpen,
            ..
        }
    ));

    // Open breaker means the gateway was not touched again
    assert_eq!(operation.invocations(), 3);
    // The rejected submit adds exactly one item
    assert_eq!(manager.queue().size().await, size_before + 1);
    assert_eq!(sink.count(metric_names::SUBMIT_QUEUED), 4);
    assert_eq!(sink.count(metric_names::SUBMIT_COMPLETED), 0);

    let opened = sink
        .records_named(metric_names::CIRCUIT_BREAKER_STATE_TRANSITION)
        .into_iter()
        .filter(|record| record.tags.get(tag_keys::TO_STATE).map(String::as_str) == Some("open"))
        .count();
    assert_eq!(opened, 1);
}

#[tokio::test]
async fn test_retry_burst_counts_as_one_breaker_failure() {
    let config = TestConfigBuilder::new()
        .service("payment_service", 2, 60)
        .retry(3, 0.001)
        .build();
    let (manager, _sink) = manager_with_sink(config).await;
    let operation = FlakyOperation::always_failing();

    let outcome = manager
        .submit("payment_service", || operation.call(), json!({}), 1)
        .await
        .unwrap();

    assert!(outcome.is_queued());
    assert_eq!(operation.invocations(), 3);

    let breaker = manager.get_circuit_breaker("payment_service").await.unwrap();
    assert_eq!(breaker.failure_count(), 1);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_success_after_retries_completes() {
    let config = TestConfigBuilder::new()
        .service("payment_service", 2, 60)
        .retry(3, 0.001)
        .build();
    let (manager, sink) = manager_with_sink(config).await;
    let operation = FlakyOperation::new(2);

    let outcome = manager
        .submit("payment_service", || operation.call(), json!({}), 1)
        .await
        .unwrap();

    assert_eq!(outcome.completed(), Some("charged"));
    assert!(manager.queue().is_empty().await);
    assert_eq!(sink.count(metric_names::SUBMIT_COMPLETED), 1);
    assert_eq!(
        manager
            .get_service_metrics("payment_service")
            .await
            .unwrap()
            .success_count,
        1
    );
}

#[tokio::test]
async fn test_full_queue_surfaces_as_error() {
    let config = TestConfigBuilder::new()
        .service("payment_service", 10, 60)
        .queue_capacity(1)
        .build();
    let (manager, _sink) = manager_with_sink(config).await;
    let operation = FlakyOperation::always_failing();

    let first = manager
        .submit("payment_service", || operation.call(), json!({"order_id": 1}), 1)
        .await
        .unwrap();
    assert!(first.is_queued());

    let err = manager
        .submit("payment_service", || operation.call(), json!({"order_id": 2}), 1)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ResilienceErrorKind::QueueFull);
    assert!(matches!(err, ResilienceError::QueueFull { capacity: 1, .. }));
}

#[tokio::test]
async fn test_drain_waits_for_breaker_then_processes_by_priority() {
    let config = TestConfigBuilder::new().service("payment_service", 1, 60).build();
    let (manager, _sink) = manager_with_sink(config).await;

    let process = |item: QueueItem| async move { Ok::<_, TestError>(item.payload["order_id"].clone()) };

    assert_eq!(
        manager.drain_next("payment_service", process).await.unwrap(),
        DrainOutcome::Idle
    );

    let operation = FlakyOperation::always_failing();
    let low = manager
        .submit("payment_service", || operation.call(), json!({"order_id": "low"}), 1)
        .await
        .unwrap()
        .queued_item_id()
        .unwrap();
    let high = manager
        .submit("payment_service", || operation.call(), json!({"order_id": "high"}), 8)
        .await
        .unwrap()
        .queued_item_id()
        .unwrap();

    // Breaker tripped on the first failure; nothing leaves the queue
    assert_eq!(
        manager.drain_next("payment_service", process).await.unwrap(),
        DrainOutcome::Deferred
    );
    assert_eq!(manager.queue().size().await, 2);

    manager.force_close_all().await;

    assert_eq!(
        manager.drain_next("payment_service", process).await.unwrap(),
        DrainOutcome::Completed {
            item_id: high,
            value: json!("high"),
        }
    );
    assert_eq!(
        manager.drain_next("payment_service", process).await.unwrap(),
        DrainOutcome::Completed {
            item_id: low,
            value: json!("low"),
        }
    );
    assert_eq!(
        manager.drain_next("payment_service", process).await.unwrap(),
        DrainOutcome::Idle
    );
    assert_eq!(manager.queue().in_flight().await, 0);
}

#[tokio::test]
async fn test_drain_resumes_after_recovery_timeout() {
    let config = TestConfigBuilder::new().service("payment_service", 1, 1).build();
    let (manager, _sink) = manager_with_sink(config).await;

    let operation = FlakyOperation::always_failing();
    let item_id = manager
        .submit("payment_service", || operation.call(), json!({"order_id": 7}), 1)
        .await
        .unwrap()
        .queued_item_id()
        .unwrap();

    let process = |_item: QueueItem| async { Ok::<_, TestError>("charged") };
    assert_eq!(
        manager.drain_next("payment_service", process).await.unwrap(),
        DrainOutcome::Deferred
    );

    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert_eq!(
        manager.drain_next("payment_service", process).await.unwrap(),
        DrainOutcome::Completed {
            item_id,
            value: "charged",
        }
    );
    let breaker = manager.get_circuit_breaker("payment_service").await.unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_failed_drain_marks_item_failed() {
    let config = TestConfigBuilder::new().service("payment_service", 5, 60).build();
    let (manager, _sink) = manager_with_sink(config).await;

    let operation = FlakyOperation::always_failing();
    let item_id = manager
        .submit("payment_service", || operation.call(), json!({"order_id": 9}), 1)
        .await
        .unwrap()
        .queued_item_id()
        .unwrap();

    let outcome = manager
        .drain_next("payment_service", |_item: QueueItem| async {
            Err::<(), _>(TestError::new("card declined"))
        })
        .await
        .unwrap();

    assert_eq!(
        outcome,
        DrainOutcome::Failed {
            item_id,
            error: "card declined".to_string(),
        }
    );
    assert!(manager.queue().is_empty().await);
    let breaker = manager.get_circuit_breaker("payment_service").await.unwrap();
    assert_eq!(breaker.failure_count(), 2);
}

#[tokio::test]
async fn test_execute_protected_rejects_when_open() {
    let config = TestConfigBuilder::new().service("inventory_service", 1, 60).build();
    let (manager, _sink) = manager_with_sink(config).await;
    let operation = FlakyOperation::always_failing();

    let err = manager
        .execute_protected("inventory_service", || operation.call())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ResilienceErrorKind::OperationFailed);

    let err = manager
        .execute_protected("inventory_service", || operation.call())
        .await
        .unwrap_err();
    assert!(
        matches!(err, ResilienceError::CircuitOpen { ref service } if service == "inventory_service")
    );
    assert_eq!(operation.invocations(), 1);
    assert!(manager.queue().is_empty().await);
}

#[tokio::test]
async fn test_execute_with_retry_reports_exhaustion() {
    let config = TestConfigBuilder::new().retry(2, 0.001).build();
    let (manager, _sink) = manager_with_sink(config).await;
    let operation = FlakyOperation::always_failing();

    let err = manager
        .execute_with_retry(|| operation.call())
        .await
        .unwrap_err();

    assert!(matches!(err, ResilienceError::RetriesExhausted { attempts: 2, .. }));
    assert_eq!(operation.invocations(), 2);
}

#[tokio::test]
async fn test_concurrency_control_through_manager() {
    let config = TestConfigBuilder::new().concurrency(1, 20).build();
    let (manager, _sink) = manager_with_sink(config).await;

    let holder = manager.clone();
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
    let held = tokio::spawn(async move {
        holder
            .execute_with_concurrency_control(|| async move {
                let _ = started_tx.send(());
                let _ = release_rx.await;
            })
            .await
    });
    started_rx.await.unwrap();

    let err = manager
        .execute_with_concurrency_control(|| async { "decrement stock" })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ResilienceErrorKind::ConcurrencyLimit);

    release_tx.send(()).unwrap();
    held.await.unwrap().unwrap();

    let value = manager
        .execute_with_concurrency_control(|| async { "decrement stock" })
        .await
        .unwrap();
    assert_eq!(value, "decrement stock");

    let health = manager.health().await;
    assert_eq!(health.active_operations, 0);
    assert_eq!(health.peak_active_operations, 1);
}

#[tokio::test]
async fn test_health_snapshot_reflects_components() {
    let config = TestConfigBuilder::new()
        .service("payment_service", 1, 60)
        .service("inventory_service", 5, 60)
        .build();
    let (manager, _sink) = manager_with_sink(config).await;
    let operation = FlakyOperation::always_failing();

    manager
        .submit("payment_service", || operation.call(), json!({}), 1)
        .await
        .unwrap();

    let health = manager.health().await;
    assert_eq!(health.queue_size, 1);
    assert_eq!(health.queue_in_flight, 0);
    assert_eq!(health.circuit_breakers.circuit_breakers.len(), 2);
    let unhealthy: Vec<&String> = health
        .circuit_breakers
        .unhealthy_circuits()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(unhealthy, vec!["payment_service"]);
    assert!((health.health_score - 0.5).abs() < f64::EPSILON);

    let serialized = serde_json::to_value(&health).unwrap();
    assert_eq!(serialized["queue_size"], 1);
}

#[tokio::test]
async fn test_queued_work_survives_manager_rebuild() {
    let store = Arc::new(InMemoryQueueStore::new());
    let config = TestConfigBuilder::new().service("payment_service", 5, 60).build();

    let first = ResilienceManager::builder(config.clone())
        .queue_store(store.clone())
        .build()
        .await
        .unwrap();
    let operation = FlakyOperation::always_failing();
    let item_id = first
        .submit("payment_service", || operation.call(), json!({"order_id": 42}), 3)
        .await
        .unwrap()
        .queued_item_id()
        .unwrap();
    drop(first);

    let second = ResilienceManager::builder(config)
        .queue_store(store)
        .build()
        .await
        .unwrap();
    assert_eq!(second.queue().size().await, 1);

    let outcome = second
        .drain_next("payment_service", |item: QueueItem| async move {
            Ok::<_, TestError>(item.payload["order_id"].as_i64())
        })
        .await
        .unwrap();
    assert_eq!(
        outcome,
        DrainOutcome::Completed {
            item_id,
            value: Some(42),
        }
    );
}

#[tokio::test]
async fn test_managers_do_not_share_breakers() {
    let config = TestConfigBuilder::new().service("payment_service", 1, 60).build();
    let (first, _) = manager_with_sink(config.clone()).await;
    let (second, _) = manager_with_sink(config).await;

    first.force_open_all().await;

    let first_breaker = first.get_circuit_breaker("payment_service").await.unwrap();
    let second_breaker = second.get_circuit_breaker("payment_service").await.unwrap();
    assert_eq!(first_breaker.state(), CircuitState::Open);
    assert_eq!(second_breaker.state(), CircuitState::Closed);
}
