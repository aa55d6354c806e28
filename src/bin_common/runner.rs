//! Binary runner utilities
//!
//! Provides a standardized way to run binaries with configuration,
//! logging, banners and a bounded run time.

use crate::config::RuntimeConfig;
use crate::logging::init_tracing;
use std::time::Duration;
use tracing::info;

/// Configuration for running a binary application
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Name of the binary (for logging)
    pub name: String,
    /// How long to wait for outstanding work before giving up
    pub run_timeout: Duration,
}

impl RunConfig {
    /// Create a new run configuration
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            run_timeout: Duration::from_secs(30),
        }
    }

    /// Set how long the binary may wait on the network
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }
}

/// Trait for binary applications
///
/// The pools do their I/O on their own threads, so `run` is a plain
/// blocking function.
pub trait BinaryRunner {
    /// Run the application to completion
    fn run(&mut self, runtime: &RuntimeConfig) -> anyhow::Result<()>;

    /// Get the run configuration
    fn config(&self) -> &RunConfig;

    /// Print startup banner
    fn print_banner(&self) {
        let config = self.config();
        info!("");
        info!("========================================");
        info!("Starting {}", config.name);
        info!("========================================");
        info!("");
    }

    /// Print shutdown banner
    fn print_shutdown(&self, stats: Option<&str>) {
        let config = self.config();
        info!("");
        info!("========================================");
        info!("{} finished", config.name);
        if let Some(stats) = stats {
            info!("{}", stats);
        }
        info!("========================================");
    }

    /// Load configuration, initialize logging and run
    fn execute(&mut self, runtime: RuntimeConfig) -> anyhow::Result<()> {
        init_tracing(&runtime.log_level);
        runtime.log();
        self.print_banner();
        let result = self.run(&runtime);
        self.print_shutdown(None);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_config_builder() {
        let config = RunConfig::new("test-binary").with_run_timeout(Duration::from_secs(5));

        assert_eq!(config.name, "test-binary");
        assert_eq!(config.run_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_default_config() {
        let config = RunConfig::new("default");
        assert_eq!(config.run_timeout, Duration::from_secs(30));
    }
}
