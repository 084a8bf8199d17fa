//! # Configuration Module
//!
//! Handles loading and validating the application configuration from TOML
//! files. This is the *application* config (port, timeouts, sampling
//! defaults) — the bulk *device* configuration lives in
//! [`crate::device::config_apply`].

use serde::Deserialize;
use serde::de::Error;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::shell::channel::{ChannelConfig, SHELL_PROMPT};
use crate::shell::transport::SHELL_BAUD_RATE;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,

    #[serde(default)]
    pub shell: ShellConfig,

    #[serde(default)]
    pub adc: AdcConfig,

    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub profiling: ProfilingConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

/// Shell/command-channel configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ShellConfig {
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    #[serde(default = "default_prompt")]
    pub prompt: String,
}

/// ADC sampling configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AdcConfig {
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u32,

    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u32,
}

/// Device session configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    #[serde(default = "default_auto_reboot")]
    pub auto_reboot: bool,
}

/// Battery profiling defaults
#[derive(Debug, Deserialize, Clone)]
pub struct ProfilingConfig {
    #[serde(default = "default_reporting_rate_ms")]
    pub reporting_rate_ms: u32,

    #[serde(default = "default_rest_duration_s")]
    pub rest_duration_s: u32,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyACM0".to_string() }
fn default_baud_rate() -> u32 { SHELL_BAUD_RATE }

fn default_command_timeout_ms() -> u64 { 2000 }
fn default_prompt() -> String { SHELL_PROMPT.to_string() }

fn default_sample_interval_ms() -> u32 { 1000 }
fn default_report_interval_ms() -> u32 { 2000 }

fn default_auto_reboot() -> bool { true }

fn default_reporting_rate_ms() -> u32 { 1000 }
fn default_rest_duration_s() -> u32 { 900 }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: default_command_timeout_ms(),
            prompt: default_prompt(),
        }
    }
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: default_sample_interval_ms(),
            report_interval_ms: default_report_interval_ms(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            auto_reboot: default_auto_reboot(),
        }
    }
}

impl Default for ProfilingConfig {
    fn default() -> Self {
        Self {
            reporting_rate_ms: default_reporting_rate_ms(),
            rest_duration_s: default_rest_duration_s(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, TOML parsing fails, or
    /// validation fails.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(crate::error::PmicBridgeError::Config(
                toml::de::Error::custom("serial port cannot be empty"),
            ));
        }

        if self.shell.command_timeout_ms == 0 {
            return Err(crate::error::PmicBridgeError::Config(
                toml::de::Error::custom("shell command_timeout_ms must be positive"),
            ));
        }

        if self.adc.sample_interval_ms == 0 || self.adc.report_interval_ms == 0 {
            return Err(crate::error::PmicBridgeError::Config(
                toml::de::Error::custom("adc intervals must be positive"),
            ));
        }

        Ok(())
    }

    /// Channel tuning derived from this configuration
    #[must_use]
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            timeout: Duration::from_millis(self.shell.command_timeout_ms),
            prompt: self.shell.prompt.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.serial.port, "/dev/ttyACM0");
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.shell.command_timeout_ms, 2000);
        assert_eq!(config.shell.prompt, "shell:~$");
        assert!(config.device.auto_reboot);
        assert_eq!(config.profiling.reporting_rate_ms, 1000);
        assert_eq!(config.profiling.rest_duration_s, 900);
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[serial]\nport = \"/dev/ttyUSB3\"\n\n[device]\nauto_reboot = false\n"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.serial.port, "/dev/ttyUSB3");
        assert_eq!(config.serial.baud_rate, 115_200);
        assert!(!config.device.auto_reboot);
    }

    #[test]
    fn test_empty_port_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[serial]\nport = \"\"\n").unwrap();

        let result = Config::load(file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[shell]\ncommand_timeout_ms = 0\n").unwrap();

        let result = Config::load(file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let result = Config::load("/nonexistent/pmic-bridge.toml");
        assert!(matches!(
            result,
            Err(crate::error::PmicBridgeError::Io(_))
        ));
    }

    #[test]
    fn test_channel_config_derivation() {
        let mut config = Config::default();
        config.shell.command_timeout_ms = 500;
        let channel = config.channel_config();
        assert_eq!(channel.timeout, Duration::from_millis(500));
        assert_eq!(channel.prompt, "shell:~$");
    }
}
