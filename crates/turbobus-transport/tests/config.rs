//! Loading connector configuration from files and the environment.

use std::io::Write;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serial_test::serial;
use tempfile::NamedTempFile;
use turbobus_transport::{
    ConfigError, ConnectorConfig, ExhaustedAction, PoolExhaustedAction, RetryPolicyKind,
};

fn file_with(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

const TOML: &str = r#"
validate_connections = false

[receiver_threading]
max_threads_active = 4
max_buffer_size = 32
exhausted_action = "abort"

[dispatcher_pool]
exhausted_action = "fail"
max_active = 3

[polling]
frequency = { secs = 0, nanos = 250000000 }
continuous = true

[retry_policy]
kind = "simple"
max_attempts = 5
frequency = { secs = 2, nanos = 0 }
"#;

#[test]
#[serial]
fn test_loads_toml_file() {
    let file = file_with(".toml", TOML);
    let config = ConnectorConfig::from_file(file.path()).unwrap();

    assert!(!config.validate_connections);
    assert_eq!(config.receiver_threading.max_threads_active, 4);
    assert_eq!(config.receiver_threading.max_buffer_size, 32);
    assert_eq!(config.receiver_threading.exhausted_action, ExhaustedAction::Abort);
    assert_eq!(config.dispatcher_pool.exhausted_action, PoolExhaustedAction::Fail);
    assert_eq!(config.max_dispatchers_active(), 3);
    assert_eq!(config.polling.frequency, Duration::from_millis(250));
    assert!(config.polling.continuous);
    assert_eq!(config.retry_policy.kind, RetryPolicyKind::Simple);
    assert_eq!(config.retry_policy.max_attempts, 5);
    assert_eq!(config.retry_policy.frequency, Duration::from_secs(2));
    // untouched sections keep their defaults
    assert_eq!(config.requester_threading, ConnectorConfig::default().requester_threading);
}

#[test]
#[serial]
fn test_loads_json_file() {
    let file = file_with(
        ".json",
        r#"{
            "transacted": { "multiple_receivers": false, "concurrency": 2 },
            "work_shutdown_timeout": { "secs": 1, "nanos": 0 }
        }"#,
    );
    let config = ConnectorConfig::from_file(file.path()).unwrap();

    assert!(!config.transacted.multiple_receivers);
    assert_eq!(config.transacted.concurrency, 2);
    assert!(config.transacted.receive_in_transaction);
    assert_eq!(config.work_shutdown_timeout, Duration::from_secs(1));
}

#[test]
#[serial]
fn test_loads_yaml_file() {
    let file = file_with(
        ".yaml",
        "requester_threading:\n  max_threads_active: 2\nvalidate_connections: true\n",
    );
    let config = ConnectorConfig::from_file(file.path()).unwrap();
    assert_eq!(config.max_requesters_active(), 2);
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let file = file_with(".toml", TOML);
    // SAFETY: serialised with the other tests touching the environment
    unsafe {
        std::env::set_var("BUSTEST_VALIDATE_CONNECTIONS", "true");
        std::env::set_var("BUSTEST_RECEIVER_THREADING__MAX_THREADS_ACTIVE", "9");
    }

    let config = ConnectorConfig::from_file_with_prefix(file.path(), "BUSTEST");

    unsafe {
        std::env::remove_var("BUSTEST_VALIDATE_CONNECTIONS");
        std::env::remove_var("BUSTEST_RECEIVER_THREADING__MAX_THREADS_ACTIVE");
    }
    let config = config.unwrap();
    assert!(config.validate_connections);
    assert_eq!(config.receiver_threading.max_threads_active, 9);
    assert_eq!(config.receiver_threading.max_buffer_size, 32);
}

#[test]
#[serial]
fn test_out_of_range_values_are_rejected() {
    let file = file_with(".toml", "[transacted]\nconcurrency = 0\n");
    let result = ConnectorConfig::from_file(file.path());
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
#[serial]
fn test_unknown_extension_is_rejected() {
    let file = file_with(".ini", "validate_connections = false\n");
    assert!(matches!(
        ConnectorConfig::from_file(file.path()),
        Err(ConfigError::UnsupportedFormat)
    ));
}
