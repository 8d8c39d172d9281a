//! Configuration System using Figment
//!
//! Settings are loaded from:
//! 1. a TOML file (`config/default.toml` unless another path is given)
//! 2. environment variables prefixed with `BALANCE_LOGGER_`, using `__` to
//!    separate nested keys
//!
//! Every field has a default, so a missing file is not an error.
//!
//! # Example
//! ```no_run
//! use balance_logger::config::Settings;
//!
//! let settings = Settings::load()?;
//! println!("Interval: {}s", settings.acquisition.interval_secs);
//! # Ok::<(), balance_logger::error::DaqError>(())
//! ```
//!
//! Override from the shell:
//! `BALANCE_LOGGER_ACQUISITION__INTERVAL_SECS=30 balance-logger record ...`

use crate::command::OutputCommand;
use crate::device::Device;
use crate::error::{AppResult, DaqError};
use crate::validation;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationConfig,
    /// Acquisition loop settings
    pub acquisition: AcquisitionConfig,
    /// Balances to record from, in column order
    pub devices: Vec<DeviceConfig>,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Balance Logger".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Acquisition loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Seconds between ticks
    pub interval_secs: u64,
    /// Output command sent to every balance
    pub command: OutputCommand,
    /// Log filename without extension
    pub filename: String,
    /// Directory that receives log files
    pub data_dir: PathBuf,
    /// Serial baud rate
    pub baud_rate: u32,
    /// Deadline for one measurement exchange
    pub measure_timeout_ms: u64,
    /// Deadline for a probe exchange
    pub probe_timeout_ms: u64,
    /// Pause after each wake-up command at run start
    pub wake_delay_ms: u64,
    /// Pause before the first tick
    pub settle_delay_ms: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            command: OutputCommand::Continuous,
            filename: "test_run".to_string(),
            data_dir: PathBuf::from("data"),
            baud_rate: 9600,
            measure_timeout_ms: 2000,
            probe_timeout_ms: 500,
            wake_delay_ms: 200,
            settle_delay_ms: 1000,
        }
    }
}

impl AcquisitionConfig {
    /// Measurement deadline.
    pub fn measure_timeout(&self) -> Duration {
        Duration::from_millis(self.measure_timeout_ms)
    }

    /// Probe deadline.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Pause after each wake-up command.
    pub fn wake_delay(&self) -> Duration {
        Duration::from_millis(self.wake_delay_ms)
    }

    /// Pause before the first tick.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// A balance entry in the configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Port path or name
    pub identifier: String,
    /// Optional display name
    #[serde(default)]
    pub name: Option<String>,
}

impl DeviceConfig {
    /// Resolve into a [`Device`].
    pub fn to_device(&self) -> Device {
        Device::new(self.identifier.clone(), self.name.as_deref())
    }
}

impl Settings {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("BALANCE_LOGGER_").split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        validation::is_valid_interval(self.acquisition.interval_secs)
            .map_err(|e| DaqError::Configuration(e.to_string()))?;

        if self.acquisition.measure_timeout_ms == 0 || self.acquisition.probe_timeout_ms == 0 {
            return Err(DaqError::Configuration(
                "Timeouts must be greater than 0 ms".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        for device in &self.devices {
            if !ids.insert(&device.identifier) {
                return Err(DaqError::Configuration(format!(
                    "Duplicate device identifier: {}",
                    device.identifier
                )));
            }
        }

        Ok(())
    }

    /// Configured devices, in column order.
    pub fn devices(&self) -> Vec<Device> {
        self.devices.iter().map(DeviceConfig::to_device).collect()
    }
}
