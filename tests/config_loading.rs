//! Integration test: Configuration utilities
//!
//! Tests the bin_common path resolver and runtime config loading.

use std::env;
use std::io::Write;
use wirepool_runtime::bin_common::{config_path_from_env, CliArgs, ConfigSource};
use wirepool_runtime::config::{ConfigError, RuntimeConfig};

#[test]
fn test_runtime_config_path_from_env() {
    // Only test touching this variable, so no cross-test interference
    env::remove_var("WIREPOOL_CONFIG_PATH");
    let config_path = config_path_from_env();
    assert_eq!(config_path.to_str().unwrap(), "config/wirepool.yaml");

    env::set_var("WIREPOOL_CONFIG_PATH", "/etc/wirepool/prod.yaml");
    assert_eq!(ConfigSource::Environment.resolve().to_str().unwrap(), "/etc/wirepool/prod.yaml");

    // an explicit --config still wins over the environment
    let args = CliArgs::parse_from(["--config", "local.yaml"]).unwrap();
    assert_eq!(args.config.resolve().to_str().unwrap(), "local.yaml");
    env::remove_var("WIREPOOL_CONFIG_PATH");
}

#[test]
fn test_cli_config_loads_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "log_level: warn\n").unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let args = CliArgs::parse_from([format!("--config={}", path), "http://example.com/".to_string()]).unwrap();
    let config = RuntimeConfig::load(args.config.resolve()).unwrap();
    assert_eq!(config.log_level, "warn");
    assert_eq!(args.positional, vec!["http://example.com/"]);
}

#[test]
fn test_load_yaml_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        "log_level: debug\n\
         websocket:\n  max_connections: 16\n  ping_interval_secs: 0\n  subprotocol: chat\n\
         http:\n  max_redirects: 2\n  user_agent: tester/1.0\n"
    )
    .unwrap();

    let config = RuntimeConfig::load(file.path()).unwrap();
    assert_eq!(config.websocket.subprotocol.as_deref(), Some("chat"));
    assert_eq!(config.websocket.ping_interval(), None);
    assert_eq!(config.http.max_redirects, 2);
    assert_eq!(config.http.user_agent, "tester/1.0");
    assert_eq!(config.http.max_retries, 3);
}

#[test]
fn test_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = RuntimeConfig::load(dir.path().join("absent.yaml")).unwrap();
    assert!(config.http.request_timeout_secs > 0);
    assert_eq!(config.websocket.fragment_size, 32768);
}

#[test]
fn test_invalid_yaml_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "websocket: [not, a, map]").unwrap();

    let result = RuntimeConfig::load(file.path());
    assert!(matches!(result, Err(ConfigError::YamlError(_))));
}

#[test]
fn test_invalid_values_are_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "websocket:\n  fragment_size: 0\n").unwrap();

    let result = RuntimeConfig::load(file.path());
    assert!(matches!(result, Err(ConfigError::ValidationError(_))));
}
