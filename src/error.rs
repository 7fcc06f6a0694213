//! Error types and handling for Phoebus
//!
//! This module defines the error types used throughout the crate,
//! providing consistent error handling and reporting. Transport and
//! decode failures carry their own enums so a poll cycle can tell a
//! wire problem apart from a data-shape problem in diagnostics.

use thiserror::Error;

/// Result type alias for Phoebus operations
pub type Result<T> = std::result::Result<T, PhoebusError>;

/// Errors raised by the Modbus transport during a poll cycle.
///
/// All variants are transient: the hub logs them, leaves the snapshot
/// untouched and retries on the next timer tick.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Operation attempted without an open connection
    #[error("not connected to Modbus server")]
    NotConnected,

    /// The request did not complete within the operation timeout
    #[error("Modbus request timed out")]
    Timeout,

    /// The device answered with a Modbus exception or the request
    /// failed at the protocol level
    #[error("Modbus protocol error: {message}")]
    Protocol { message: String },

    /// The device returned fewer registers than requested
    #[error("short read: requested {requested} registers, got {received}")]
    ShortRead { requested: u16, received: usize },
}

/// Errors raised by the register decoder.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The register block is shorter than the family's required span
    #[error("truncated input: need {required} registers, got {received}")]
    TruncatedInput { required: usize, received: usize },

    /// The device family selector is not a known register map
    #[error("unsupported device family: {name}")]
    UnsupportedFamily { name: String },
}

/// Main error type for Phoebus
#[derive(Debug, Error)]
pub enum PhoebusError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// TCP connect failure (subscribe-time; the hub stays idle)
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Modbus transport errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Register decode errors
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl PhoebusError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        PhoebusError::Config {
            message: message.into(),
        }
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        PhoebusError::Connection {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        PhoebusError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        PhoebusError::Io {
            message: message.into(),
        }
    }
}

impl TransportError {
    /// Create a protocol error from any displayable cause
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        TransportError::Protocol {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for PhoebusError {
    fn from(err: std::io::Error) -> Self {
        PhoebusError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for PhoebusError {
    fn from(err: serde_yaml::Error) -> Self {
        PhoebusError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for PhoebusError {
    fn from(err: serde_json::Error) -> Self {
        PhoebusError::Serialization {
            message: err.to_string(),
        }
    }
}
