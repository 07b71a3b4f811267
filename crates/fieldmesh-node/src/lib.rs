//! Fieldmesh gateway node
//!
//! The networked end of the field mesh: a BLE central on a radio node that
//! uploads incidents to the backend and answers relayed HTTP requests.
//! The `fieldmesh-node` binary wires these pieces to a CLI.
//!
//! - [`gateway`] - Central transport, incident uploader, relay bridge
//! - [`backend`] - reqwest client for the backend endpoints
//! - [`sim`] - In-process radio node for hardware-free runs
//! - [`config`] - JSON configuration
//! - [`error`] - Error types

pub mod backend;
pub mod config;
pub mod error;
pub mod gateway;
pub mod sim;

pub use backend::{BackendClient, IncidentUpload};
pub use config::{BackendConfig, GatewayConfig, UploadFormat};
pub use error::{NodeError, Result};
pub use gateway::{Gateway, IncidentUploader, UploadStats};
pub use sim::SimulatedRadio;
