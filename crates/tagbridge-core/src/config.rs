/*!
 * Configuration management for TagBridge.
 *
 * This module loads the gateway configuration (general settings, logging,
 * bootstrap timings and the device list) from a TOML file and environment
 * variables, and provides the [`Device`] record drivers are configured with.
 */
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use config::{Config as ConfigLib, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Option key that selects the driver of a device
pub const DRIVER_OPTION: &str = "driver";

/// A configured field device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    name: String,
    driver: String,
    options: HashMap<String, String>,
}

impl Device {
    /// Create a device record
    pub fn new<N, D>(name: N, driver: D, options: HashMap<String, String>) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Self {
            name: name.into(),
            driver: driver.into(),
            options,
        }
    }

    /// The unique device name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The driver kind, a key into the driver registry
    pub fn driver(&self) -> &str {
        &self.driver
    }

    /// All configured options
    pub fn options(&self) -> &HashMap<String, String> {
        &self.options
    }

    /// Get a required option
    pub fn option(&self, key: &str) -> Result<&str> {
        self.options.get(key).map(String::as_str).ok_or_else(|| {
            Error::config(format!("Device {} is missing option {}", self.name, key))
        })
    }

    /// Get an option, falling back to `default`
    pub fn option_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.options.get(key).map(String::as_str).unwrap_or(default)
    }

    /// Parse an option, falling back to `default` when it is absent
    pub fn parsed_option<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.options.get(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e| {
                Error::config(format!(
                    "Device {} has invalid option {}={:?}: {}",
                    self.name, key, raw, e
                ))
            }),
        }
    }

    /// A millisecond option as a duration
    pub fn duration_option_ms(&self, key: &str, default_ms: u64) -> Result<Duration> {
        self.parsed_option(key, default_ms).map(Duration::from_millis)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.driver)
    }
}

/// Gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General configuration
    #[serde(default)]
    pub general: GeneralConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Gateway bootstrap configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Devices by name; each table holds the device options, including `driver`
    #[serde(default)]
    pub devices: BTreeMap<String, HashMap<String, String>>,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Application environment (development, production, etc.)
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter (trace, debug, info, warn, error or an EnvFilter directive)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to include the log target
    #[serde(default = "default_with_target")]
    pub with_target: bool,
}

/// Gateway bootstrap configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// How long to wait for all devices to finish initialization
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,

    /// Refresh cadence used when polling all tags
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            environment: default_environment(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: default_with_target(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ready_timeout_ms: default_ready_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl GatewayConfig {
    /// Ready timeout as a duration
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_app_name() -> String {
    "tagbridge".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_with_target() -> bool {
    true
}

fn default_ready_timeout_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

impl Config {
    /// Check settings that make the whole configuration unusable
    pub fn validate(&self) -> Result<()> {
        if self.devices.is_empty() {
            return Err(Error::config(
                "No devices were configured, add at least one [devices.<name>] table",
            ));
        }
        if self.gateway.poll_interval_ms == 0 {
            return Err(Error::config("gateway.poll_interval_ms must be greater than zero"));
        }
        Ok(())
    }

    /// The configured devices in name order.
    ///
    /// A device without a `driver` option gets an empty driver kind, which the
    /// driver registry rejects for that device alone.
    pub fn devices(&self) -> Vec<Device> {
        self.devices
            .iter()
            .map(|(name, options)| {
                let driver = options.get(DRIVER_OPTION).cloned().unwrap_or_default();
                Device::new(name.clone(), driver, options.clone())
            })
            .collect()
    }
}

/// A builder for creating a configuration
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_file: Option<String>,
    inline_toml: Option<String>,
    environment_prefix: Option<String>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the config file path
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Add configuration from a TOML string, applied after the file
    pub fn with_toml_str<S: AsRef<str>>(mut self, toml: S) -> Self {
        self.inline_toml = Some(toml.as_ref().to_string());
        self
    }

    /// Set the environment variable prefix for configuration
    pub fn with_environment_prefix<S: AsRef<str>>(mut self, prefix: S) -> Self {
        self.environment_prefix = Some(prefix.as_ref().to_string());
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<Config> {
        let mut config_builder = ConfigLib::builder();

        let default_config = Config::default();
        config_builder = config_builder.add_source(
            ConfigLib::try_from(&default_config)
                .map_err(|e| Error::config(format!("Failed to create default config: {}", e)))?,
        );

        if let Some(config_file) = self.config_file {
            let path = Path::new(&config_file);
            if path.exists() {
                debug!("Loading configuration from {}", config_file);
                config_builder = config_builder.add_source(File::with_name(&config_file));
            } else {
                return Err(Error::config(format!(
                    "Configuration file {} does not exist",
                    config_file
                )));
            }
        }

        if let Some(toml) = self.inline_toml {
            config_builder = config_builder.add_source(File::from_str(&toml, FileFormat::Toml));
        }

        if let Some(prefix) = self.environment_prefix {
            debug!("Loading configuration from environment variables with prefix {}", prefix);
            config_builder = config_builder.add_source(
                Environment::with_prefix(&prefix)
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config_lib = config_builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build configuration: {}", e)))?;

        let config: Config = config_lib
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize configuration: {}", e)))?;

        info!("Configuration loaded with {} device(s)", config.devices.len());
        Ok(config)
    }
}
