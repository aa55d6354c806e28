//! WirePool Runtime - Main Library
//!
//! Application-side wiring around the `wirepool` crate: YAML runtime
//! configuration, logging bootstrap and helpers shared by the binaries.
//!
//! ## Architecture
//!
//! - **wirepool**: WebSocket multiplexer and async HTTP pool (re-exported from workspace)
//! - **config**: `RuntimeConfig` loading with environment overrides
//! - **logging**: tracing subscriber setup
//! - **bin_common**: Common utilities for binary executables (CLI, runners)
//!
//! ## Usage in Binaries
//!
//! ```rust,ignore
//! use wirepool_runtime::bin_common::parse_args;
//! use wirepool_runtime::config::RuntimeConfig;
//!
//! let args = parse_args()?;
//! let config = RuntimeConfig::load(args.config.resolve())?;
//! wirepool_runtime::logging::init_tracing(&config.log_level);
//! ```

// Re-export workspace libraries for convenience
pub use wirepool;

pub mod config;
pub mod logging;

// Binary common utilities
pub mod bin_common {
    //! Common utilities for binary executables

    pub mod cli;
    pub mod runner;

    pub use cli::{config_path_from_env, parse_args, CliArgs, ConfigSource};
    pub use runner::{BinaryRunner, RunConfig};
}
