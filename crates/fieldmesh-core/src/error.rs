//! Error types for fieldmesh core operations
//!
//! Covers the incident payload codec, persisted device settings and
//! configuration loading.

use thiserror::Error;

/// Main error type for core operations
#[derive(Error, Debug)]
pub enum CoreError {
    // ===== Codec Errors =====
    /// Declared lengths or headers do not fit the received buffer
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// Payload field exceeds what its length prefix can carry
    #[error("Payload too large: {field} is {size} bytes, maximum {max}")]
    PayloadTooLarge {
        /// Offending field
        field: &'static str,
        /// Actual size
        size: usize,
        /// Maximum size
        max: usize,
    },

    /// Unsupported payload version byte
    #[error("Unsupported payload version: {0}")]
    UnsupportedVersion(u8),

    /// Priority string or code not recognised
    #[error("Invalid priority: {0}")]
    InvalidPriority(String),

    // ===== Identity & Settings Errors =====
    /// Settings store failure
    #[error("Settings error: {0}")]
    Settings(String),

    /// Hardware address could not be parsed
    #[error("Invalid MAC address: {0}")]
    InvalidMac(String),

    // ===== Configuration Errors =====
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ===== General Errors =====
    /// Serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::Malformed(_) => "MALFORMED",
            CoreError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            CoreError::UnsupportedVersion(_) => "UNSUPPORTED_VERSION",
            CoreError::InvalidPriority(_) => "INVALID_PRIORITY",
            CoreError::Settings(_) => "SETTINGS_ERROR",
            CoreError::InvalidMac(_) => "INVALID_MAC",
            CoreError::InvalidConfig(_) => "INVALID_CONFIG",
            CoreError::Serialization(_) => "SERIALIZATION_ERROR",
            CoreError::Io(_) => "IO_ERROR",
        }
    }

    /// Check if the error came from bad wire data rather than local state
    pub fn is_wire_error(&self) -> bool {
        matches!(
            self,
            CoreError::Malformed(_) | CoreError::UnsupportedVersion(_)
        )
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
