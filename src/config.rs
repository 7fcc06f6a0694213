//! Configuration structures for Phoebus
//!
//! The host application is responsible for acquiring and validating its
//! own configuration; this module only defines the plain settings
//! structure handed to a [`crate::hub::PollingHub`], plus YAML helpers
//! for hosts that keep per-device settings in files.

use crate::error::{PhoebusError, Result};
use crate::registers::DeviceFamily;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    2
}

fn default_poll_interval() -> u64 {
    30
}

/// Settings for one polled inverter, immutable per hub instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Hostname or IP address of the inverter's Modbus TCP endpoint
    pub host: String,

    /// TCP port (typically 502)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Modbus unit identifier of the inverter on the link
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Poll interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Register map selector
    pub family: DeviceFamily,

    /// Close and reopen the connection after this many consecutive
    /// transport failures. 0 disables mid-lifecycle reconnects: the
    /// connection then only cycles at subscribe/unsubscribe boundaries.
    #[serde(default)]
    pub reconnect_after_failures: u32,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Path to the log file directory
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: "/tmp/phoebus.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            unit_id: default_unit_id(),
            poll_interval_secs: default_poll_interval(),
            family: DeviceFamily::ThreePhase,
            reconnect_after_failures: 0,
            logging: LoggingConfig::default(),
        }
    }
}

impl Settings {
    /// Settings for one device with everything else defaulted
    pub fn new<S: Into<String>>(host: S, family: DeviceFamily) -> Self {
        Self {
            host: host.into(),
            family,
            ..Self::default()
        }
    }

    /// Load settings from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse settings from a YAML string
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(contents)?;
        Ok(settings)
    }

    /// Save settings to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(PhoebusError::validation("host", "host cannot be empty"));
        }

        if self.port == 0 {
            return Err(PhoebusError::validation(
                "port",
                "port must be greater than 0",
            ));
        }

        if self.poll_interval_secs == 0 {
            return Err(PhoebusError::validation(
                "poll_interval_secs",
                "poll interval must be greater than 0",
            ));
        }

        Ok(())
    }
}
