//! Tests for configuration validation

use signerd::config::EngineConfig;

fn valid() -> EngineConfig {
    EngineConfig {
        worker_threads: 4,
        ..EngineConfig::with_zonelist("/etc/signerd/zonelist.json")
    }
}

#[test]
fn test_engine_config_defaults() {
    let config = EngineConfig::default();
    assert!(config.worker_threads >= 1);
    assert_eq!(config.drudger_threads, 0);
    assert_eq!(config.max_backoff_secs, 3600);
    assert_eq!(config.queue_capacity, 1000);
    assert_eq!(config.queue_threshold, 1);
    assert!(config.command_socket.is_none());
}

#[test]
fn test_engine_config_validation() {
    assert!(valid().validate().is_ok());
    assert!(EngineConfig::default().validate().is_err());
}

#[test]
fn test_engine_config_invalid_workers() {
    let config = EngineConfig { worker_threads: 0, ..valid() };
    assert!(config.validate().is_err());
}

#[test]
fn test_engine_config_invalid_backoff() {
    let config = EngineConfig { max_backoff_secs: 59, ..valid() };
    assert!(config.validate().is_err());
    let config = EngineConfig { max_backoff_secs: 60, ..valid() };
    assert!(config.validate().is_ok());
}

#[test]
fn test_engine_config_invalid_queue() {
    let config = EngineConfig { queue_capacity: 0, ..valid() };
    assert!(config.validate().is_err());
    let config = EngineConfig { queue_capacity: 4, queue_threshold: 5, ..valid() };
    assert!(config.validate().is_err());
}

#[test]
fn test_engine_config_from_json() {
    let config = EngineConfig::from_json_str(
        r#"{"zonelist": "zonelist.json", "worker_threads": 2, "drudger_threads": 4}"#,
    )
    .unwrap();
    assert_eq!(config.worker_threads, 2);
    assert_eq!(config.drudger_threads, 4);
    assert_eq!(config.max_sleep_secs, 3600);

    assert!(EngineConfig::from_json_str(r#"{"zonelist": "z", "bogus": 1}"#).is_err());
    assert!(EngineConfig::from_json_str("{}").is_err());
}

#[test]
fn test_engine_config_load_resolves_relative_paths() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("signerd.json");
    std::fs::write(
        &path,
        r#"{"zonelist": "zonelist.json", "command_socket": "signerd.sock"}"#,
    )
    .unwrap();

    let config = EngineConfig::load(&path).unwrap();
    assert_eq!(config.zonelist, dir.path().join("zonelist.json"));
    assert_eq!(config.command_socket, Some(dir.path().join("signerd.sock")));
}
