//! Pool configuration
//!
//! Plain serde structs so they can be embedded in an application's YAML
//! config; every field has a default.

use crate::traits::error::{Result, WirePoolError};
use crate::traits::retry::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Connection multiplexer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Hard cap on simultaneously live connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Keepalive Ping interval; 0 disables keepalive
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    /// Upper bound for how long the background loop waits on an idle poll
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// TCP + TLS connect deadline
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Outbound messages above this size are split into fragments
    #[serde(default = "default_fragment_size")]
    pub fragment_size: usize,

    /// Largest frame or reassembled message accepted from the peer
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// Value for `Sec-WebSocket-Protocol`
    #[serde(default)]
    pub subprotocol: Option<String>,

    /// Check `Sec-WebSocket-Accept` when the server sends it
    #[serde(default = "default_true")]
    pub verify_accept: bool,

    #[serde(default)]
    pub tls: TlsConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            ping_interval_secs: default_ping_interval_secs(),
            poll_timeout_ms: default_poll_timeout_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            fragment_size: default_fragment_size(),
            max_message_size: default_max_message_size(),
            read_buffer_size: default_read_buffer_size(),
            subprotocol: None,
            verify_accept: true,
            tls: TlsConfig::default(),
        }
    }
}

impl PoolConfig {
    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_secs > 0).then(|| Duration::from_secs(self.ping_interval_secs))
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(WirePoolError::Configuration(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.fragment_size == 0 {
            return Err(WirePoolError::Configuration(
                "fragment_size must be greater than 0".into(),
            ));
        }
        if self.max_message_size < self.fragment_size {
            return Err(WirePoolError::Configuration(format!(
                "max_message_size ({}) must be at least fragment_size ({})",
                self.max_message_size, self.fragment_size
            )));
        }
        if self.read_buffer_size == 0 {
            return Err(WirePoolError::Configuration(
                "read_buffer_size must be greater than 0".into(),
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err(WirePoolError::Configuration(
                "connect_timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Async request pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpPoolConfig {
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,

    /// Connect retries after a transport failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_initial_backoff_ms")]
    pub retry_initial_backoff_ms: u64,

    #[serde(default = "default_retry_max_backoff_ms")]
    pub retry_max_backoff_ms: u64,

    /// Lifetime of one logical request, redirects and retries included
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_max_message_size")]
    pub max_response_size: usize,

    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    #[serde(default)]
    pub tls: TlsConfig,
}

impl Default for HttpPoolConfig {
    fn default() -> Self {
        Self {
            max_redirects: default_max_redirects(),
            max_retries: default_max_retries(),
            retry_initial_backoff_ms: default_retry_initial_backoff_ms(),
            retry_max_backoff_ms: default_retry_max_backoff_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            poll_timeout_ms: default_poll_timeout_ms(),
            user_agent: default_user_agent(),
            max_response_size: default_max_message_size(),
            read_buffer_size: default_read_buffer_size(),
            tls: TlsConfig::default(),
        }
    }
}

impl HttpPoolConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Connect-retry policy described by the `max_retries` and backoff fields
    pub fn retry_policy(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(self.retry_initial_backoff_ms),
            Duration::from_millis(self.retry_max_backoff_ms),
            Some(self.max_retries as usize),
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            return Err(WirePoolError::Configuration(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.retry_max_backoff_ms < self.retry_initial_backoff_ms {
            return Err(WirePoolError::Configuration(
                "retry_max_backoff_ms must be at least retry_initial_backoff_ms".into(),
            ));
        }
        if self.read_buffer_size == 0 {
            return Err(WirePoolError::Configuration(
                "read_buffer_size must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Certificate settings handed to the TLS provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default = "default_true")]
    pub verify_peer: bool,

    /// Extra PEM root certificate to trust
    #[serde(default)]
    pub ca_file: Option<PathBuf>,

    /// PEM client certificate, used together with `key_file`
    #[serde(default)]
    pub cert_file: Option<PathBuf>,

    /// PKCS#8 PEM private key for `cert_file`
    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            verify_peer: true,
            ca_file: None,
            cert_file: None,
            key_file: None,
        }
    }
}

fn default_max_connections() -> usize {
    100
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_poll_timeout_ms() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_fragment_size() -> usize {
    32 * 1024
}

fn default_max_message_size() -> usize {
    64 * 1024 * 1024
}

fn default_read_buffer_size() -> usize {
    16 * 1024
}

fn default_max_redirects() -> u32 {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_initial_backoff_ms() -> u64 {
    100
}

fn default_retry_max_backoff_ms() -> u64 {
    5_000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    "wirepool/0.1".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_connections, 100);
        assert_eq!(config.ping_interval(), Some(Duration::from_secs(30)));
        assert_eq!(config.fragment_size, 32768);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_http_defaults() {
        let config = HttpPoolConfig::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_redirects, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_ping_interval_disables_keepalive() {
        let config = PoolConfig {
            ping_interval_secs: 0,
            ..PoolConfig::default()
        };
        assert_eq!(config.ping_interval(), None);
    }

    #[test]
    fn test_validation_failures() {
        let zero_cap = PoolConfig {
            max_connections: 0,
            ..PoolConfig::default()
        };
        assert!(matches!(zero_cap.validate(), Err(WirePoolError::Configuration(_))));

        let tiny_max = PoolConfig {
            max_message_size: 10,
            ..PoolConfig::default()
        };
        assert!(tiny_max.validate().is_err());

        let backwards_backoff = HttpPoolConfig {
            retry_initial_backoff_ms: 1000,
            retry_max_backoff_ms: 10,
            ..HttpPoolConfig::default()
        };
        assert!(backwards_backoff.validate().is_err());
    }
}
