//! Fieldmesh Core - shared types for the field incident mesh
//!
//! This crate provides the pieces every fieldmesh runtime agrees on,
//! independent of radio or BLE transport.
//!
//! # Modules
//!
//! - [`identity`] - Persistent 32-bit node id, settings store, device naming
//! - [`incident`] - Compact binary incident payload and priority codes
//! - [`location`] - Coordinates and their fixed-point wire form
//! - [`event`] - Bounded drop-on-full sensor event queue
//! - [`config`] - Identity and logging configuration
//! - [`error`] - Error types
//!
//! # Example
//!
//! ```rust
//! use fieldmesh_core::{BinaryIncidentCodec, Location, Priority};
//!
//! let bytes = BinaryIncidentCodec::encode(
//!     "Drone spotted",
//!     Location::new(52.520008, 13.404954, 34.5),
//!     [0, 1, 2, 3, 4, 5],
//!     Priority::High,
//!     None,
//! )?;
//! let incident = BinaryIncidentCodec::decode(&bytes)?;
//! assert_eq!(incident.altitude_m, 34);
//! # Ok::<(), fieldmesh_core::CoreError>(())
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod identity;
pub mod incident;
pub mod location;

pub use config::{IdentityConfig, LogFormat, LogLevel, LoggingConfig};
pub use error::{CoreError, Result};
pub use event::{EventConsumer, EventProducer, EventQueue, SensorEvent};
pub use identity::{
    derive_node_id, matches_device_name, parse_mac, DeviceIdentity, FileSettings,
    MemorySettings, SettingsStore, BROADCAST_ADDR, DEVICE_NAME_PREFIX,
};
pub use incident::{BinaryIncidentCodec, IncidentBinaryPayload, Priority};
pub use location::Location;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
