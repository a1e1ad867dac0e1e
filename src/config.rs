//! Application configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (`config/default.toml` unless another path is given)
//! 2. Environment variables prefixed with `SMU_`, using `__` to separate nested keys
//!
//! # Environment Variable Overrides
//!
//! ```text
//! SMU_APPLICATION__LOG_LEVEL=debug
//! SMU_SERIAL__PORT=/dev/ttyUSB0
//! SMU_SWEEP__STEP=0.05
//! SMU_STORAGE__PATH=/data/iv-curve.csv
//! ```
//!
//! Every field has a default, so an empty or missing file yields a usable configuration.

use crate::app::DEFAULT_COMMAND_CAPACITY;
use crate::data::DEFAULT_STORE_PATH;
use crate::error::{AppResult, SmuError};
use crate::instrument::PortSelector;
use crate::sweep_config::SweepConfig;
use crate::telemetry;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Logging
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Serial link
    #[serde(default)]
    pub serial: SerialConfig,
    /// Point store
    #[serde(default)]
    pub storage: StorageConfig,
    /// Observer queues
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Command channel
    #[serde(default)]
    pub controller: ControllerConfig,
    /// Sweep configuration the controller starts with
    #[serde(default)]
    pub sweep: SweepConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Serial link configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Device path; when absent the first enumerated device is used
    #[serde(default)]
    pub port: Option<String>,
    /// Line speed
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Time allowed for one reply line
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

/// Persistent store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Tab-separated output file, appended across runs
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

/// Telemetry channel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Queue length per observer
    #[serde(default = "default_telemetry_capacity")]
    pub capacity: usize,
}

/// Run controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Command queue length
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_log_level() -> String {
    "info".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_read_timeout_ms() -> u64 {
    1000
}

fn default_store_path() -> PathBuf {
    PathBuf::from(DEFAULT_STORE_PATH)
}

fn default_telemetry_capacity() -> usize {
    telemetry::DEFAULT_CAPACITY
}

fn default_command_capacity() -> usize {
    DEFAULT_COMMAND_CAPACITY
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            capacity: default_telemetry_capacity(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            command_capacity: default_command_capacity(),
        }
    }
}

impl SerialConfig {
    /// Port selection derived from the configured device path.
    pub fn port_selector(&self) -> PortSelector {
        PortSelector::from_option(self.port.clone())
    }

    /// Reply timeout as a [`Duration`].
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl AppConfig {
    /// Load configuration from `config/default.toml` and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// Precedence, highest first: `SMU_` environment variables, the file, built-in defaults.
    /// A missing file is not an error. The result is validated.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SMU_").split("__"));
        Self::from_figment(figment)
    }

    /// Extracts and validates a configuration from an assembled figment.
    pub fn from_figment(figment: Figment) -> AppResult<Self> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Baud rate, read timeout and queue capacities are non-zero
    /// - Storage path is not empty
    /// - The initial sweep configuration satisfies its invariants
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(SmuError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.serial.baud_rate == 0 {
            return Err(SmuError::Configuration(
                "serial.baud_rate must be greater than 0".into(),
            ));
        }
        if self.serial.read_timeout_ms == 0 {
            return Err(SmuError::Configuration(
                "serial.read_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.storage.path.as_os_str().is_empty() {
            return Err(SmuError::Configuration("storage.path cannot be empty".into()));
        }
        if self.telemetry.capacity == 0 {
            return Err(SmuError::Configuration(
                "telemetry.capacity must be greater than 0".into(),
            ));
        }
        if self.controller.command_capacity == 0 {
            return Err(SmuError::Configuration(
                "controller.command_capacity must be greater than 0".into(),
            ));
        }

        self.sweep
            .validate()
            .map_err(|e| SmuError::Configuration(format!("sweep: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{SaveMode, WireMode};

    fn from_toml(toml: &str) -> AppResult<AppConfig> {
        AppConfig::from_figment(
            Figment::new()
                .merge(Serialized::defaults(AppConfig::default()))
                .merge(Toml::string(toml)),
        )
    }

    #[test]
    fn test_defaults_validate() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.serial.read_timeout(), Duration::from_secs(1));
        assert_eq!(config.storage.path, PathBuf::from("measurement.csv"));
        assert_eq!(config.serial.port_selector(), PortSelector::Auto);
    }

    #[test]
    fn test_partial_file() {
        let config = from_toml(
            r#"
            [serial]
            port = "/dev/ttyUSB0"

            [sweep]
            start = -1.0
            end = 1.0
            step = 0.5
            wire_mode = "4wire"
            save_mode = "realtime"
            average_count = 5
            "#,
        )
        .unwrap();

        assert_eq!(
            config.serial.port_selector(),
            PortSelector::Named("/dev/ttyUSB0".into())
        );
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.sweep.start, -1.0);
        assert_eq!(config.sweep.wire_mode, WireMode::FourWire);
        assert_eq!(config.sweep.save_mode, SaveMode::Realtime);
        assert_eq!(config.sweep.average_count.get(), 5);
        assert_eq!(config.application.log_level, "info");
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            from_toml("[application]\nlog_level = \"loud\""),
            Err(SmuError::Configuration(_))
        ));
        assert!(from_toml("[telemetry]\ncapacity = 0").is_err());
        assert!(from_toml("[sweep]\nstart = 2.0\nend = 1.0").is_err());
        assert!(from_toml("[sweep]\nstep = 0.0").is_err());
        // not one of the supported averaging counts
        assert!(matches!(
            from_toml("[sweep]\naverage_count = 4"),
            Err(SmuError::Config(_))
        ));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.telemetry.capacity, telemetry::DEFAULT_CAPACITY);
    }
}
