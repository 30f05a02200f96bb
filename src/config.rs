//! Configuration management for the arbiter daemon
//!
//! Separates startup configuration (requires restart) from runtime
//! configuration (may change while the daemon is running). The package grant
//! table is part of the configuration.

use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::auth::PackageGrants;

/// Files searched for configuration, in order; all optional.
const CONFIG_PATHS: [&str; 2] = ["config/arbiter", "arbiter"];

/// Environment variables override file values, e.g. `SCOPED_STORAGE__CONTROL_PORT`.
const ENV_PREFIX: &str = "SCOPED_STORAGE";
const ENV_SEPARATOR: &str = "__";

/// Complete daemon configuration with startup/runtime separation
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(flatten)]
    pub startup: StartupConfig,

    #[serde(flatten)]
    pub runtime: RuntimeConfig,

    /// Packages known to the arbiter and their grants
    #[serde(default)]
    pub packages: Vec<PackageGrants>,
}

/// Configuration that requires a restart to take effect
#[derive(Debug, Deserialize, Clone)]
pub struct StartupConfig {
    /// IP address the control listener binds to
    pub bind_address: String,

    /// Port of the control listener; 0 is rejected by validation
    pub control_port: u16,

    /// Root of the shared storage tree
    pub storage_root: String,

    /// Longest accepted command line, in bytes
    pub max_command_length: usize,

    /// Page size of the I/O coordinator's cache
    pub page_size: usize,
}

/// Configuration that can be updated while the daemon is running
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// Maximum concurrent sessions
    pub max_clients: usize,
}

/// Thread-safe runtime configuration wrapper
pub type SharedRuntimeConfig = Arc<RwLock<RuntimeConfig>>;

impl ServerConfig {
    /// Loads configuration from the first config file found, with
    /// environment overrides on top of built-in defaults.
    pub fn load() -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder()
            .set_default("bind_address", "127.0.0.1")?
            .set_default("control_port", 2121)?
            .set_default("storage_root", "./storage")?
            .set_default("max_command_length", 8192)?
            .set_default("page_size", 4096)?
            .set_default("max_clients", 32)?;

        for path in CONFIG_PATHS {
            builder = builder.add_source(File::with_name(path).required(false));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;

        let config: ServerConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Split into startup (immutable) and runtime (mutable) parts
    pub fn split(self) -> (StartupConfig, SharedRuntimeConfig, Vec<PackageGrants>) {
        let runtime = Arc::new(RwLock::new(self.runtime));
        (self.startup, runtime, self.packages)
    }

    /// Validation for all configuration values
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.startup.control_port == 0 {
            return Err(config::ConfigError::Message(
                "Control port cannot be 0".into(),
            ));
        }

        if self.startup.storage_root.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "storage_root cannot be empty".into(),
            ));
        }

        if self.startup.page_size == 0 || !self.startup.page_size.is_power_of_two() {
            return Err(config::ConfigError::Message(
                "page_size must be a non-zero power of two".into(),
            ));
        }

        if self.startup.max_command_length == 0 {
            return Err(config::ConfigError::Message(
                "max_command_length must be greater than 0".into(),
            ));
        }

        if self.runtime.max_clients == 0 {
            return Err(config::ConfigError::Message(
                "max_clients must be greater than 0".into(),
            ));
        }

        let mut uids = HashSet::new();
        for package in &self.packages {
            if !uids.insert(package.uid) {
                return Err(config::ConfigError::Message(format!(
                    "duplicate uid {} in packages",
                    package.uid
                )));
            }
        }

        Ok(())
    }
}

impl StartupConfig {
    /// Get bind address and control port as socket address
    pub fn control_socket(&self) -> String {
        format!("{}:{}", self.bind_address, self.control_port)
    }

    pub fn storage_root_path(&self) -> PathBuf {
        PathBuf::from(&self.storage_root)
    }
}
