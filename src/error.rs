//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of failure a logging run can meet, from a balance that does not
//! answer to a log file that can no longer be written.
//!
//! ## Error Hierarchy
//!
//! - **`Connection`**: open/write/read failure on a device transport. Inside a tick this
//!   never escapes the poller; it is turned into an `Error` reading for that device only.
//! - **`Validation`**: a bad filename, interval or device list, reported by
//!   `RunController::start` before any device I/O or file creation happens.
//! - **`FileExists`**: the resolved log path is already taken. Recoverable: the caller
//!   may pick another name and start again.
//! - **`FileSystem`**: the log file could not be created or appended to. Fatal to the run.
//! - **`AlreadyRunning`**: `start()` was called while a run is still active.
//! - **`Config`** / **`Configuration`**: settings that fail to load or fail validation.
//!
//! Parse failures are deliberately absent: an unparseable balance line is a
//! `Reading::Unavailable`, never an error.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Settings could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Settings loaded but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Open, write or read failure on a device transport.
    #[error("Connection error on '{port}': {reason}")]
    Connection {
        /// Port identifier.
        port: String,
        /// Underlying failure.
        reason: String,
    },

    /// Run parameters rejected before any I/O.
    #[error("Invalid run parameters: {0}")]
    Validation(String),

    /// The log path is already taken.
    #[error("Log file already exists: {}", .0.display())]
    FileExists(PathBuf),

    /// The log file could not be created or written.
    #[error("Log file error: {0}")]
    FileSystem(String),

    /// `start()` called while a run is active or stopping.
    #[error("A recording run is already active")]
    AlreadyRunning,

    /// Built without serial port support.
    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,
}

impl DaqError {
    /// Builds a `Connection` error for `port`.
    pub fn connection(port: impl Into<String>, reason: impl ToString) -> Self {
        DaqError::Connection {
            port: port.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the caller can correct the problem and retry without restarting
    /// the application.
    pub fn is_recoverable(&self) -> bool {
        match self {
            DaqError::Validation(_)
            | DaqError::FileExists(_)
            | DaqError::AlreadyRunning
            | DaqError::Connection { .. } => true,
            DaqError::Config(_)
            | DaqError::Configuration(_)
            | DaqError::FileSystem(_)
            | DaqError::SerialFeatureDisabled => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_exists_is_recoverable() {
        let err = DaqError::FileExists(PathBuf::from("data/run.csv"));
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("data/run.csv"));
    }

    #[test]
    fn file_system_errors_end_the_run() {
        let err = DaqError::FileSystem("disk full".into());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn connection_error_names_the_port() {
        let err = DaqError::connection("/dev/ttyUSB3", "permission denied");
        assert_eq!(
            err.to_string(),
            "Connection error on '/dev/ttyUSB3': permission denied"
        );
    }
}
