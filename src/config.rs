//! Runtime configuration
//!
//! One YAML file holds both pool configurations plus the log level.
//! A few values can be overridden from the environment (or a `.env` file).

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::info;
use wirepool::{HttpPoolConfig, PoolConfig};

pub const ENV_LOG_LEVEL: &str = "WIREPOOL_LOG_LEVEL";
pub const ENV_MAX_CONNECTIONS: &str = "WIREPOOL_MAX_CONNECTIONS";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "WIREPOOL_REQUEST_TIMEOUT_SECS";

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config file: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration for applications embedding both pools
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub websocket: PoolConfig,

    #[serde(default)]
    pub http: HttpPoolConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            websocket: PoolConfig::default(),
            http: HttpPoolConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load from YAML, then apply `.env` and environment overrides
    ///
    /// A missing file is not an error: defaults are used instead.
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self> {
        let path = config_path.as_ref();
        let mut config = if path.exists() {
            let yaml_content = std::fs::read_to_string(path)?;
            Self::from_yaml(&yaml_content)?
        } else {
            info!("No config file at {}, using defaults", path.display());
            Self::default()
        };

        dotenv::dotenv().ok(); // Don't fail if .env doesn't exist
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RuntimeConfig = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Override file values with whatever `lookup` finds
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            info!("Overriding log level from environment variable");
            self.log_level = level.to_lowercase();
        }
        if let Some(value) = lookup(ENV_MAX_CONNECTIONS) {
            info!("Overriding max connections from environment variable");
            self.websocket.max_connections = parse_override(ENV_MAX_CONNECTIONS, &value)?;
        }
        if let Some(value) = lookup(ENV_REQUEST_TIMEOUT_SECS) {
            info!("Overriding request timeout from environment variable");
            self.http.request_timeout_secs = parse_override(ENV_REQUEST_TIMEOUT_SECS, &value)?;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "log_level must be one of {:?}, got '{}'",
                LOG_LEVELS, self.log_level
            )));
        }
        self.websocket
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("websocket: {}", e)))?;
        self.http
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("http: {}", e)))?;
        Ok(())
    }

    /// Log configuration summary
    pub fn log(&self) {
        info!("Configuration loaded:");
        info!("  Log level: {}", self.log_level);
        info!("  Max connections: {}", self.websocket.max_connections);
        match self.websocket.ping_interval() {
            Some(interval) => info!("  Keepalive interval: {:?}", interval),
            None => info!("  Keepalive interval: disabled"),
        }
        info!("  Request timeout: {:?}", self.http.request_timeout());
        info!("  Max redirects: {}", self.http.max_redirects);
        info!("  Verify TLS peers: {}", self.websocket.tls.verify_peer && self.http.tls.verify_peer);
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{} is not a valid number: '{}'", key, value)))
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = RuntimeConfig::from_yaml("websocket:\n  max_connections: 8\n").unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.websocket.max_connections, 8);
        assert_eq!(config.websocket.fragment_size, 32768);
        assert_eq!(config.http.max_redirects, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_LOG_LEVEL, "DEBUG"),
            (ENV_MAX_CONNECTIONS, "12"),
            (ENV_REQUEST_TIMEOUT_SECS, " 3 "),
        ]
        .into_iter()
        .collect();

        let mut config = RuntimeConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.websocket.max_connections, 12);
        assert_eq!(config.http.request_timeout_secs, 3);
    }

    #[test]
    fn test_bad_override_is_rejected() {
        let mut config = RuntimeConfig::default();
        let result = config.apply_overrides(|key| (key == ENV_MAX_CONNECTIONS).then(|| "lots".to_string()));
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_config_validation() {
        let mut config = RuntimeConfig::default();
        assert!(config.validate().is_ok());

        config.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        config.log_level = "warn".to_string();
        config.websocket.max_connections = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("websocket"));
    }
}
