//! Command line handling shared by the binaries
//!
//! Every binary accepts `--config <path>` (or `--config=<path>`) next to its
//! own positional arguments. Without it the runtime config is read from
//! `WIREPOOL_CONFIG_PATH`, then from `config/wirepool.yaml`.

use anyhow::{bail, Result};
use std::path::PathBuf;

pub const CONFIG_PATH_ENV: &str = "WIREPOOL_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/wirepool.yaml";

/// Where the runtime config comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// `WIREPOOL_CONFIG_PATH`, else the default path
    Environment,
    /// Given on the command line
    Explicit(PathBuf),
}

impl ConfigSource {
    pub fn resolve(&self) -> PathBuf {
        match self {
            ConfigSource::Environment => config_path_from_env(),
            ConfigSource::Explicit(path) => path.clone(),
        }
    }
}

/// Config path from `WIREPOOL_CONFIG_PATH` or the default
pub fn config_path_from_env() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
        .into()
}

/// Parsed arguments of a binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub config: ConfigSource,
    /// Everything that is not an option, in order
    pub positional: Vec<String>,
}

impl CliArgs {
    /// Parse arguments without the program name
    ///
    /// A bare `--` ends option parsing.
    pub fn parse_from<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut config = ConfigSource::Environment;
        let mut positional = Vec::new();
        let mut args = args.into_iter().map(Into::into);

        while let Some(arg) = args.next() {
            if arg == "--" {
                positional.extend(args);
                break;
            }
            let path = if arg == "--config" {
                args.next()
            } else if let Some(path) = arg.strip_prefix("--config=") {
                Some(path.to_string())
            } else {
                positional.push(arg);
                continue;
            };
            match path {
                Some(path) if !path.is_empty() => config = ConfigSource::Explicit(path.into()),
                _ => bail!("--config needs a path"),
            }
        }

        Ok(Self { config, positional })
    }
}

/// Parse the process arguments
pub fn parse_args() -> Result<CliArgs> {
    CliArgs::parse_from(std::env::args().skip(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_only() {
        let args = CliArgs::parse_from(["ws://localhost:9001/", "hello"]).unwrap();
        assert_eq!(args.config, ConfigSource::Environment);
        assert_eq!(args.positional, vec!["ws://localhost:9001/", "hello"]);
    }

    #[test]
    fn test_config_option_forms() {
        let args = CliArgs::parse_from(["--config", "a.yaml", "url"]).unwrap();
        assert_eq!(args.config, ConfigSource::Explicit("a.yaml".into()));
        assert_eq!(args.positional, vec!["url"]);

        let args = CliArgs::parse_from(["url", "--config=b.yaml"]).unwrap();
        assert_eq!(args.config.resolve(), PathBuf::from("b.yaml"));
        assert_eq!(args.positional, vec!["url"]);
    }

    #[test]
    fn test_config_option_needs_path() {
        assert!(CliArgs::parse_from(["--config"]).is_err());
        assert!(CliArgs::parse_from(["--config="]).is_err());
    }

    #[test]
    fn test_double_dash_ends_options() {
        let args = CliArgs::parse_from(["--", "--config", "x"]).unwrap();
        assert_eq!(args.config, ConfigSource::Environment);
        assert_eq!(args.positional, vec!["--config", "x"]);
    }
}
