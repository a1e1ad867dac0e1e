//! Custom error types for the sweep controller.
//!
//! This module defines the primary error type, `SmuError`, for the entire crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of failures a sweep can run into, from rejected configuration
//! changes to a serial link that stops answering in the middle of a run.
//!
//! ## Error Hierarchy
//!
//! Every variant belongs to one [`ErrorCategory`]:
//!
//! - **Configuration**: an invalid parameter value, or a mutation attempted while a run is
//!   active. Rejected synchronously with no state change.
//! - **Device**: port not found, open failure, write failure, or an operation that needs an
//!   instrument session before `init()` created one. Aborts only the failing operation.
//! - **Measurement**: read timeout or malformed reply during a run. Aborts the run, which then
//!   goes through the normal shutdown sequence and reports an error event.
//! - **Internal**: storage, configuration loading and controller plumbing failures.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, SmuError>;

/// Coarse classification used to decide how far a failure propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid parameter or operation not allowed in the current run state.
    Configuration,
    /// Serial device could not be found, opened or written.
    Device,
    /// The instrument did not produce a usable reading.
    Measurement,
    /// Everything else (storage, configuration files, controller task).
    Internal,
}

/// Errors reported by the controller, the instrument driver and the stores.
#[derive(Error, Debug)]
pub enum SmuError {
    /// Operation not allowed in the current run state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Argument outside its domain; nothing was changed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No instrument session is open
    #[error("Instrument not initialized")]
    NotInitialized,

    /// No serial device matched the selector
    #[error("Serial port not found: {0}")]
    PortNotFound(String),

    /// The device exists but could not be opened
    #[error("Failed to open serial port '{port}': {reason}")]
    OpenFailed {
        /// Device path
        port: String,
        /// Driver message
        reason: String,
    },

    /// A command line could not be written
    #[error("Failed to write '{command}' to instrument: {reason}")]
    Write {
        /// Command that failed
        command: String,
        /// Driver message
        reason: String,
    },

    /// A query got no reply line in time
    #[error("No reply to '{command}' within {timeout:?}")]
    MeasurementTimeout {
        /// Query that timed out
        command: String,
        /// Read timeout in effect
        timeout: Duration,
    },

    /// A reply line could not be split into its fields
    #[error("Malformed reply to '{command}': '{reply}'")]
    MalformedReply {
        /// Query that was answered
        command: String,
        /// Raw reply line
        reply: String,
    },

    /// The point store rejected a write
    #[error("Storage error: {0}")]
    Storage(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Loaded configuration failed validation
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// The controller task has exited
    #[error("Run controller is no longer running")]
    ControllerUnavailable,

    /// Built without the `instrument_serial` feature
    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,
}

impl SmuError {
    /// Maps the error onto the failure taxonomy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SmuError::InvalidState(_) | SmuError::InvalidArgument(_) => {
                ErrorCategory::Configuration
            }
            SmuError::NotInitialized
            | SmuError::PortNotFound(_)
            | SmuError::OpenFailed { .. }
            | SmuError::Write { .. }
            | SmuError::SerialFeatureDisabled => ErrorCategory::Device,
            SmuError::MeasurementTimeout { .. } | SmuError::MalformedReply { .. } => {
                ErrorCategory::Measurement
            }
            SmuError::Storage(_)
            | SmuError::Io(_)
            | SmuError::Config(_)
            | SmuError::Configuration(_)
            | SmuError::ControllerUnavailable => ErrorCategory::Internal,
        }
    }

    /// Shorthand for the rejection every setter returns while a run is active.
    pub(crate) fn busy(operation: &str) -> Self {
        SmuError::InvalidState(format!("cannot {} while a measurement is running", operation))
    }
}

impl From<csv::Error> for SmuError {
    fn from(err: csv::Error) -> Self {
        SmuError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SmuError::MalformedReply {
            command: ":MEAS:CURR?".to_string(),
            reply: "1.0".to_string(),
        };
        assert_eq!(err.to_string(), "Malformed reply to ':MEAS:CURR?': '1.0'");
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            SmuError::InvalidArgument("step".into()).category(),
            ErrorCategory::Configuration
        );
        assert_eq!(SmuError::NotInitialized.category(), ErrorCategory::Device);
        assert_eq!(
            SmuError::MeasurementTimeout {
                command: ":MEAS:CURR?".into(),
                timeout: Duration::from_secs(1),
            }
            .category(),
            ErrorCategory::Measurement
        );
        assert_eq!(
            SmuError::Storage("disk full".into()).category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn test_busy_message() {
        let err = SmuError::busy("change the step");
        assert!(matches!(err, SmuError::InvalidState(_)));
        assert!(err.to_string().contains("change the step"));
    }
}
