//! Error types for Meshtastic transport and relay operations
//!
//! Link faults are retriable and handled by reconnect; protocol faults mean
//! the peer sent bytes we could not make sense of.

use thiserror::Error;

/// Main error type for Meshtastic operations
#[derive(Error, Debug)]
pub enum MeshtasticError {
    // ===== BLE Link Errors =====
    /// Adapter or scan failure
    #[error("BLE scan failed: {0}")]
    ScanFailed(String),

    /// No device matched the scan filter
    #[error("No matching device found during {window_ms}ms scan")]
    DeviceNotFound {
        /// Scan window in milliseconds
        window_ms: u64,
    },

    /// Connect attempt failed
    #[error("Failed to connect to {device}: {reason}")]
    ConnectFailed {
        /// Device name or address
        device: String,
        /// Failure reason
        reason: String,
    },

    /// Connection timeout
    #[error("Connection timeout after {duration_ms}ms")]
    ConnectionTimeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// The service did not expose all three characteristics
    #[error("Missing characteristics: found {found} of 3")]
    CharacteristicsMissing {
        /// Characteristics found
        found: usize,
    },

    /// Link dropped
    #[error("Device disconnected")]
    Disconnected,

    /// Characteristic read error
    #[error("Read error: {0}")]
    ReadError(String),

    /// Characteristic write error
    #[error("Write error: {0}")]
    WriteError(String),

    // ===== Protocol Errors =====
    /// Encode buffer ran out of room
    #[error("Protobuf encode overflow: {needed} bytes needed, capacity {capacity}")]
    EncodeOverflow {
        /// Bytes the message needed
        needed: usize,
        /// Buffer capacity
        capacity: usize,
    },

    /// Invalid packet format
    #[error("Invalid packet format: {0}")]
    InvalidPacket(String),

    /// Payload too large for one packet
    #[error("Message too large: {size} bytes exceeds maximum of {max} bytes")]
    MessageTooLarge {
        /// Actual message size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    // ===== Relay Errors =====
    /// Relay text frame could not be parsed
    #[error("Relay protocol error: {0}")]
    RelayProtocol(String),

    /// Upstream HTTP call failed
    #[error("HTTP error: {0}")]
    Http(String),

    /// No response arrived before the local deadline
    #[error("Relay request {req_id} timed out after {duration_ms}ms")]
    RelayTimeout {
        /// Request id
        req_id: String,
        /// Timeout in milliseconds
        duration_ms: u64,
    },

    // ===== Configuration Errors =====
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ===== General Errors =====
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Channel send error
    #[error("Channel send error: {0}")]
    ChannelError(String),

    /// Channel closed
    #[error("Channel closed")]
    ChannelClosed,

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Mesh layer error
    #[error(transparent)]
    Mesh(#[from] fieldmesh_mesh::MeshError),
}

impl MeshtasticError {
    /// Check if this error is recoverable/retriable
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            MeshtasticError::ScanFailed(_)
                | MeshtasticError::DeviceNotFound { .. }
                | MeshtasticError::ConnectFailed { .. }
                | MeshtasticError::ConnectionTimeout { .. }
                | MeshtasticError::CharacteristicsMissing { .. }
                | MeshtasticError::Disconnected
                | MeshtasticError::ReadError(_)
                | MeshtasticError::WriteError(_)
        )
    }

    /// Check if this is a protocol error (bad data from the peer)
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            MeshtasticError::InvalidPacket(_) | MeshtasticError::RelayProtocol(_)
        )
    }

    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            MeshtasticError::ScanFailed(_) => "SCAN_FAILED",
            MeshtasticError::DeviceNotFound { .. } => "DEVICE_NOT_FOUND",
            MeshtasticError::ConnectFailed { .. } => "CONNECT_FAILED",
            MeshtasticError::ConnectionTimeout { .. } => "CONNECTION_TIMEOUT",
            MeshtasticError::CharacteristicsMissing { .. } => "CHARACTERISTICS_MISSING",
            MeshtasticError::Disconnected => "DISCONNECTED",
            MeshtasticError::ReadError(_) => "READ_ERROR",
            MeshtasticError::WriteError(_) => "WRITE_ERROR",
            MeshtasticError::EncodeOverflow { .. } => "ENCODE_OVERFLOW",
            MeshtasticError::InvalidPacket(_) => "INVALID_PACKET",
            MeshtasticError::MessageTooLarge { .. } => "MESSAGE_TOO_LARGE",
            MeshtasticError::RelayProtocol(_) => "RELAY_PROTOCOL",
            MeshtasticError::Http(_) => "HTTP_ERROR",
            MeshtasticError::RelayTimeout { .. } => "RELAY_TIMEOUT",
            MeshtasticError::InvalidConfig(_) => "INVALID_CONFIG",
            MeshtasticError::Internal(_) => "INTERNAL_ERROR",
            MeshtasticError::ChannelError(_) => "CHANNEL_ERROR",
            MeshtasticError::ChannelClosed => "CHANNEL_CLOSED",
            MeshtasticError::Json(_) => "JSON_ERROR",
            MeshtasticError::Mesh(e) => e.error_code(),
        }
    }
}

/// Result type alias for Meshtastic operations
pub type Result<T> = std::result::Result<T, MeshtasticError>;

// Conversion from tokio mpsc send error
impl<T> From<tokio::sync::mpsc::error::SendError<T>> for MeshtasticError {
    fn from(err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        MeshtasticError::ChannelError(err.to_string())
    }
}

#[cfg(feature = "ble")]
impl From<btleplug::Error> for MeshtasticError {
    fn from(err: btleplug::Error) -> Self {
        match err {
            btleplug::Error::NotConnected => MeshtasticError::Disconnected,
            btleplug::Error::TimedOut(d) => MeshtasticError::ConnectionTimeout {
                duration_ms: d.as_millis() as u64,
            },
            other => MeshtasticError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = MeshtasticError::CharacteristicsMissing { found: 2 };
        assert_eq!(err.error_code(), "CHARACTERISTICS_MISSING");
        assert!(err.to_string().contains("2 of 3"));
    }

    #[test]
    fn test_is_retriable() {
        assert!(MeshtasticError::Disconnected.is_retriable());
        assert!(MeshtasticError::ConnectionTimeout { duration_ms: 10000 }.is_retriable());
        assert!(!MeshtasticError::InvalidPacket("bad".into()).is_retriable());
        assert!(!MeshtasticError::ChannelClosed.is_retriable());
    }

    #[test]
    fn test_is_protocol_error() {
        assert!(MeshtasticError::RelayProtocol("no marker".into()).is_protocol_error());
        assert!(!MeshtasticError::Disconnected.is_protocol_error());
    }

    #[test]
    fn test_message_too_large() {
        let err = MeshtasticError::MessageTooLarge { size: 300, max: 237 };
        assert!(err.to_string().contains("300"));
        assert!(err.to_string().contains("237"));
    }

    #[tokio::test]
    async fn test_from_send_error() {
        let (tx, rx) = tokio::sync::mpsc::channel::<u8>(1);
        drop(rx);
        let err: MeshtasticError = tx.send(1).await.unwrap_err().into();
        assert_eq!(err.error_code(), "CHANNEL_ERROR");
    }
}
