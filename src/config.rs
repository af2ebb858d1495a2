//! Configuration loading and types for replica-set bootstrap.
//!
//! Configuration is optionally read from a YAML file and deserialized
//! into the [`Config`] struct; command-line flags are layered on top by
//! the binary.  Each subsection governs a different part of the tool:
//! the polling loop, the cluster client, and logging.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use garde::Validate;
use serde::Deserialize;
use tracing::level_filters::LevelFilter;

use crate::address::DEFAULT_PORT;
use crate::bootstrap::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct Config {
    /// Node to configure, as `host[:port]`.
    #[serde(default)]
    #[garde(skip)]
    pub target: Option<String>,

    /// Comma separated members of an existing set to join through.
    #[serde(default)]
    #[garde(skip)]
    pub seed: Option<String>,

    /// Name sent when initiating a new set.
    #[serde(default)]
    #[garde(length(min = 1))]
    pub set_name: Option<String>,

    /// Polling loop settings.
    #[serde(default)]
    #[garde(dive)]
    pub bootstrap: BootstrapConfig,

    /// Cluster client settings.
    #[serde(default)]
    #[garde(dive)]
    pub client: ClientConfig,

    /// Logging settings.
    #[serde(default)]
    #[garde(dive)]
    pub logging: LoggingConfig,
}

/// Polling loop configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BootstrapConfig {
    /// Status polls before giving up.
    #[serde(default = "default_max_attempts")]
    #[garde(range(min = 1, max = 100))]
    pub max_attempts: u32,

    /// Seconds to wait before every poll but the first.
    #[serde(default = "default_backoff_secs")]
    #[garde(range(max = 3600))]
    pub backoff_secs: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

impl BootstrapConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: Duration::from_secs(self.backoff_secs),
        }
    }
}

/// Cluster client configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ClientConfig {
    /// Port assumed for addresses that do not name one.
    #[serde(default = "default_port")]
    #[garde(range(min = 1))]
    pub default_port: u16,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    #[garde(range(min = 1, max = 600))]
    pub request_timeout_secs: u64,
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoggingConfig {
    /// Verbose level: 1 fatal, 2 error, 3 warn, 4 info, 5 debug.
    #[serde(default = "default_verbose")]
    #[garde(range(min = 1, max = 5))]
    pub verbose: u8,

    /// Append log lines to this file instead of standard error.
    #[serde(default)]
    #[garde(skip)]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            verbose: default_verbose(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Most verbose level that gets through.  There is no level below
    /// error, so fatal messages are logged as errors.
    pub fn level_filter(&self) -> LevelFilter {
        match self.verbose {
            0..=2 => LevelFilter::ERROR,
            3 => LevelFilter::WARN,
            4 => LevelFilter::INFO,
            _ => LevelFilter::DEBUG,
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_backoff_secs() -> u64 {
    5
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_request_timeout() -> u64 {
    10
}

fn default_verbose() -> u8 {
    4
}

// -- Loader ------------------------------------------------------------------

/// Load, parse and validate configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read configuration file {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&contents)
        .with_context(|| format!("cannot parse configuration file {}", path.display()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Check value ranges.  Run again after command-line overrides.
pub fn validate_config(config: &Config) -> anyhow::Result<()> {
    config
        .validate()
        .map_err(|report| anyhow::anyhow!("invalid configuration: {report}"))
}
