//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.calcmesh.toml` files.

use crate::cli::{Args, Command};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = ".calcmesh.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Operation → operator endpoint bindings.
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Aggregator settings.
    #[serde(default)]
    pub aggregator: AggregatorConfig,

    /// Transport settings.
    #[serde(default)]
    pub transport: TransportConfig,
}

/// Operator endpoint per operation kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_add")]
    pub add: String,

    #[serde(default = "default_sub")]
    pub sub: String,

    #[serde(default = "default_mul")]
    pub mul: String,

    #[serde(default = "default_div")]
    pub div: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            add: default_add(),
            sub: default_sub(),
            mul: default_mul(),
            div: default_div(),
        }
    }
}

fn default_add() -> String {
    "127.0.0.1:50051".to_string()
}

fn default_sub() -> String {
    "127.0.0.1:50052".to_string()
}

fn default_mul() -> String {
    "127.0.0.1:50053".to_string()
}

fn default_div() -> String {
    "127.0.0.1:50054".to_string()
}

/// Aggregator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Address the aggregator binds.
    #[serde(default = "default_aggregator_listen")]
    pub listen: String,

    /// Address the dispatcher and operators call.
    #[serde(default = "default_aggregator_address")]
    pub address: String,

    /// Results file path.
    #[serde(default = "default_output")]
    pub output: PathBuf,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            listen: default_aggregator_listen(),
            address: default_aggregator_address(),
            output: default_output(),
        }
    }
}

fn default_aggregator_listen() -> String {
    "0.0.0.0:50060".to_string()
}

fn default_aggregator_address() -> String {
    "127.0.0.1:50060".to_string()
}

fn default_output() -> PathBuf {
    PathBuf::from("computation_results.csv")
}

/// Transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Upper bound on one call (connect, send, reply).
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
        }
    }
}

impl TransportConfig {
    /// Bound on one call to the aggregator.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Bound on one dispatcher → operator call. An operator only replies
    /// after its own call to the aggregator, so this hop waits twice as long.
    pub fn dispatch_timeout(&self) -> Duration {
        self.timeout() * 2
    }
}

fn default_timeout() -> u64 {
    10
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were given explicitly.
    pub fn merge_with_args(&mut self, args: &Args) {
        if let Some(timeout) = args.timeout {
            self.transport.timeout_seconds = timeout;
        }

        match &args.command {
            Command::Dispatch {
                aggregator: Some(addr),
                ..
            }
            | Command::Operator {
                aggregator: Some(addr),
                ..
            } => {
                self.aggregator.address = addr.clone();
            }
            Command::Aggregator { listen, output } => {
                if let Some(listen) = listen {
                    self.aggregator.listen = listen.clone();
                }
                if let Some(output) = output {
                    self.aggregator.output = output.clone();
                }
            }
            Command::Local {
                output: Some(output),
                ..
            } => {
                self.aggregator.output = output.clone();
            }
            _ => {}
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
