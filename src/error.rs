//! # Error Types
//!
//! Custom error types for PMIC Bridge using `thiserror`.

use thiserror::Error;

/// Main error type for PMIC Bridge
#[derive(Debug, Error)]
pub enum PmicBridgeError {
    /// A shell log line did not match the `[ts] <lvl> module: message` layout
    #[error("malformed log line: {0}")]
    MalformedLine(String),

    /// No response matched the command within its timeout window
    #[error("command timed out: {command}")]
    CommandTimeout { command: String },

    /// The device answered the command with an error response
    #[error("command rejected: {command}: {response}")]
    CommandRejected { command: String, response: String },

    /// No shell attached or the device is unresponsive; nothing was sent
    #[error("no shell connection")]
    Disconnected,

    /// Bulk configuration was refused before any write happened
    #[error("configuration rejected: {0}")]
    ConfigRejected(String),

    /// A guard condition forced an ongoing profiling run to stop
    #[error("profiling interrupted: {0}")]
    ProfilingInterrupted(String),

    /// The device terminated profiling on a thermal error
    #[error("profiling stopped due to thermal error")]
    ThermalFault,

    /// Power-loss warning terminated profiling without a usable result
    #[error("profiling stopped due to power failure warning")]
    PowerLossFault,

    /// Serial transport errors
    #[error("serial error: {0}")]
    Serial(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for PMIC Bridge
pub type Result<T> = std::result::Result<T, PmicBridgeError>;
