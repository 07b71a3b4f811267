//! Error types for the gateway node

use thiserror::Error;

/// Gateway node error types
#[derive(Error, Debug)]
pub enum NodeError {
    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Backend request failed before a response arrived
    #[error("Backend request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Backend answered with a non-success status
    #[error("Backend returned {status}: {body}")]
    Status {
        /// HTTP status
        status: u16,
        /// Response body
        body: String,
    },

    /// Backend response did not have the expected shape
    #[error("Unexpected backend response: {0}")]
    UnexpectedResponse(String),

    /// Payload is neither an incident blob nor a summary
    #[error("Undecodable payload: {0}")]
    Undecodable(String),

    /// Core error
    #[error(transparent)]
    Core(#[from] fieldmesh_core::CoreError),

    /// Transport error
    #[error(transparent)]
    Transport(#[from] fieldmesh_meshtastic::MeshtasticError),

    /// Mesh error
    #[error(transparent)]
    Mesh(#[from] fieldmesh_mesh::MeshError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NodeError {
    /// Whether retrying the same call later can succeed
    pub fn is_retriable(&self) -> bool {
        match self {
            NodeError::Request(e) => e.is_timeout() || e.is_connect(),
            NodeError::Status { status, .. } => *status >= 500,
            NodeError::Transport(e) => e.is_retriable(),
            _ => false,
        }
    }
}

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, NodeError>;
