//! Mesh-layer error types

use thiserror::Error;

/// Mesh-layer errors
#[derive(Error, Debug)]
pub enum MeshError {
    /// Radio rejected or failed a transmission
    #[error("Radio error: {0}")]
    Radio(String),

    /// Envelope payload exceeds the radio MTU
    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Frame could not be parsed
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// Unknown message type code
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    /// Core type error (priority codes, incident payloads)
    #[error(transparent)]
    Core(#[from] fieldmesh_core::CoreError),

    /// Channel error
    #[error("Channel error: {0}")]
    Channel(String),

    /// Service task is no longer running
    #[error("Mesh service stopped")]
    ServiceStopped,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl MeshError {
    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            MeshError::Radio(_) => "RADIO_ERROR",
            MeshError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            MeshError::Malformed(_) => "MALFORMED",
            MeshError::UnknownMessageType(_) => "UNKNOWN_MESSAGE_TYPE",
            MeshError::Core(e) => e.error_code(),
            MeshError::Channel(_) => "CHANNEL_ERROR",
            MeshError::ServiceStopped => "SERVICE_STOPPED",
            MeshError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Whether the error is a routine flood-network rejection rather than a fault
    pub fn is_expected_drop(&self) -> bool {
        matches!(
            self,
            MeshError::Malformed(_) | MeshError::UnknownMessageType(_) | MeshError::Core(_)
        )
    }
}

/// Result type for mesh operations
pub type Result<T> = std::result::Result<T, MeshError>;
