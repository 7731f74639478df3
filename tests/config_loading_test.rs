//! Layered configuration loading from files and environment

use resilience_core::config::{ConfigManager, ConfigurationError};
use resilience_core::resilience::ResilienceManager;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

const BASE: &str = r#"
[circuit_breakers.default_config]
failure_threshold = 4
timeout_seconds = 45

[circuit_breakers.component_configs.payment_service]
failure_threshold = 2
timeout_seconds = 10

[retry]
max_attempts = 4
initial_delay_seconds = 0.5

[queue]
name = "checkout"
max_size = 250
"#;

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_base_file_overrides_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "resilience.toml", BASE);

    let manager = ConfigManager::load_from_file_with_env(&path, "development").unwrap();
    let config = manager.config();

    assert_eq!(manager.environment(), "development");
    assert_eq!(manager.source_path(), Some(path.as_path()));
    assert_eq!(config.retry.max_attempts, 4);
    assert_eq!(config.retry.backoff_factor, 2.0);
    assert_eq!(config.queue.name, "checkout");
    assert_eq!(config.queue.max_size, 250);
    assert_eq!(config.concurrency.max_concurrent, 10);

    let payment = config
        .circuit_breakers
        .config_for_component("payment_service")
        .to_resilience_config();
    assert_eq!(payment.failure_threshold, 2);
    assert_eq!(payment.timeout, Duration::from_secs(10));

    let unknown = config.circuit_breakers.config_for_component("shipping_service");
    assert_eq!(unknown.failure_threshold, 4);
}

#[test]
fn test_environment_overlay_applied() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "resilience.toml", BASE);
    write(
        &dir,
        "resilience.production.toml",
        r#"
        [queue]
        max_size = 5000

        [throttling]
        max_requests = 500
        "#,
    );

    let production = ConfigManager::load_from_file_with_env(&path, "production").unwrap();
    assert_eq!(production.config().queue.max_size, 5000);
    assert_eq!(production.config().queue.name, "checkout");
    assert_eq!(production.config().throttling.max_requests, 500);

    // No overlay for staging, the base file stands alone
    let staging = ConfigManager::load_from_file_with_env(&path, "staging").unwrap();
    assert_eq!(staging.config().queue.max_size, 250);
}

#[test]
fn test_environment_variables_override_files() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "resilience.toml", BASE);

    std::env::set_var("RESILIENCE_LOADER_TEST_QUEUE__MAX_SIZE", "42");
    std::env::set_var("RESILIENCE_LOADER_TEST_THROTTLING__ENABLED", "false");
    let loaded = ConfigManager::load_with_prefix(Some(&path), "development", "RESILIENCE_LOADER_TEST");
    std::env::remove_var("RESILIENCE_LOADER_TEST_QUEUE__MAX_SIZE");
    std::env::remove_var("RESILIENCE_LOADER_TEST_THROTTLING__ENABLED");

    let manager = loaded.unwrap();
    assert_eq!(manager.config().queue.max_size, 42);
    assert!(!manager.config().throttling.enabled);
    assert_eq!(manager.config().retry.max_attempts, 4);
}

#[test]
fn test_defaults_only_without_file() {
    let manager = ConfigManager::load_with_prefix(None, "test", "RESILIENCE_NO_SUCH_PREFIX").unwrap();
    assert!(manager.source_path().is_none());
    assert_eq!(manager.config().retry.max_attempts, 3);
    assert_eq!(manager.config().queue.name, "order_processing");
    assert!(manager.config().circuit_breakers.enabled);
}

#[test]
fn test_missing_file_reported() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("absent.toml");

    let err = ConfigManager::load_from_file_with_env(&missing, "test").unwrap_err();
    match err {
        ConfigurationError::FileNotFound { path } => assert_eq!(path, missing),
        other => panic!("expected FileNotFound, got {other:?}"),
    }
}

#[test]
fn test_malformed_toml_is_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "resilience.toml", "[retry\nmax_attempts = ");

    let err = ConfigManager::load_from_file_with_env(&path, "test").unwrap_err();
    assert!(matches!(err, ConfigurationError::ParseError { .. }));
}

#[test]
fn test_wrong_type_is_parse_error() {
    let err = ConfigManager::from_toml_str(
        r#"
        [queue]
        max_size = "lots"
        "#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigurationError::ParseError { .. }));
}

#[test]
fn test_invalid_component_threshold_names_field() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "resilience.toml",
        r#"
        [circuit_breakers.component_configs.payment_service]
        failure_threshold = 0
        timeout_seconds = 30
        "#,
    );

    let err = ConfigManager::load_from_file_with_env(&path, "test").unwrap_err();
    match err {
        ConfigurationError::ValidationError { field, .. } => assert_eq!(
            field,
            "circuit_breakers.component_configs.payment_service.failure_threshold"
        ),
        other => panic!("expected ValidationError, got {other:?}"),
    }
}

#[test]
fn test_invalid_retry_settings_rejected() {
    for body in [
        "[retry]\nmax_attempts = 0",
        "[retry]\ninitial_delay_seconds = -1.0",
        "[retry]\nbackoff_factor = 0.0",
    ] {
        let err = ConfigManager::from_toml_str(body).unwrap_err();
        assert!(
            matches!(err, ConfigurationError::ValidationError { ref field, .. } if field.starts_with("retry.")),
            "{body} gave {err:?}"
        );
    }
}

#[test]
fn test_disabled_throttling_skips_its_validation() {
    let config = ConfigManager::from_toml_str(
        r#"
        [throttling]
        enabled = false
        max_requests = 0
        "#,
    )
    .unwrap();
    assert!(!config.throttling.enabled);

    let err = ConfigManager::from_toml_str("[throttling]\nmax_requests = 0").unwrap_err();
    assert!(matches!(err, ConfigurationError::ValidationError { .. }));
}

#[tokio::test]
async fn test_shipped_config_files_build_a_manager() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/resilience.toml");
    let loaded = ConfigManager::load_with_prefix(Some(&path), "test", "RESILIENCE_SHIPPED_TEST").unwrap();

    // Test overlay disables throttling and shortens timeouts
    assert!(!loaded.config().throttling.enabled);
    assert_eq!(loaded.config().circuit_breakers.default_config.timeout_seconds, 1);

    let manager = ResilienceManager::from_config(loaded.config().clone())
        .await
        .unwrap();
    assert_eq!(
        manager.list_services().await,
        vec!["inventory_service".to_string(), "payment_service".to_string()]
    );
    assert!(manager.validate_all().await.values().all(|valid| *valid));
}
