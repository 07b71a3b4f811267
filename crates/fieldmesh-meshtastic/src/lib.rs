//! Meshtastic-compatible BLE transport for fieldmesh
//!
//! Speaks the Meshtastic phone-API over BLE so commodity companion apps
//! and the fieldmesh gateway can exchange incident traffic with a radio
//! node, and tunnels HTTP through the resulting text path.
//!
//! # Architecture
//!
//! The crate operates in four layers:
//!
//! 1. **Wire format** - a hand-rolled protobuf subset ([`proto`]) and the
//!    Meshtastic `ToRadio`/`FromRadio`/`MeshPacket` messages ([`packet`])
//! 2. **Peripheral role** - the radio node's per-connection handshake and
//!    packet queues ([`peripheral`]), coupled to the mesh by [`bridge`]
//! 3. **Central role** - scan, connect, handshake and reconnect over a
//!    [`BleLink`] ([`central`])
//! 4. **Relay** - HTTP requests and responses as chunked text ([`relay`])
//!
//! # Quick Start
//!
//! ```rust,ignore
//! // Cargo.toml: fieldmesh-meshtastic = { version = "0.1", features = ["ble"] }
//! use fieldmesh_meshtastic::{BtleplugLink, CentralEvent, CentralTransport, MeshtasticConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (transport, handle) = CentralTransport::new(BtleplugLink::new(), MeshtasticConfig::default());
//!     let mut events = handle.subscribe();
//!     tokio::spawn(transport.run());
//!
//!     while let Ok(event) = events.recv().await {
//!         if let CentralEvent::Payload { from, payload } = event {
//!             println!("0x{:08x} sent {} bytes", from, payload.len());
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `ble` - btleplug central link (requires `libdbus-1-dev` on Linux)
//!
//! # Protocol Details
//!
//! The GATT service exposes three characteristics: `ToRadio` (written by
//! the companion), `FromRadio` (read on demand, never notified) and
//! `FromNum` (a notified counter meaning "go read"). A companion writes
//! `want_config_id`, then reads my_info, node_info and config_complete
//! before any packets.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Wire format
pub mod gatt;
pub mod packet;
pub mod proto;

// Roles
pub mod central;
pub mod interface;
pub mod peripheral;

// Integration
pub mod bridge;
pub mod relay;

pub mod config;
pub mod error;

// Testing utilities
pub mod test_utils;

pub use config::{
    CentralConfig, MeshtasticConfig, MeshtasticConfigBuilder, PeripheralConfig, ReconnectConfig,
    RelayConfig,
};
pub use error::{MeshtasticError, Result};
pub use interface::{select_strongest, BleLink, ConnectionState, LinkEvent, ScanCandidate};

#[cfg(feature = "ble")]
pub use interface::BtleplugLink;

pub use bridge::{BridgeHandle, BridgeStats, RadioBridge};
pub use central::{Backoff, CentralEvent, CentralHandle, CentralStats, CentralTransport};
pub use gatt::{Characteristic, FROM_NUM_UUID, FROM_RADIO_UUID, SERVICE_UUID, TO_RADIO_UUID};
pub use packet::{
    DataPacket, FromRadio, FromRadioVariant, MeshPacket, MyNodeInfo, NodeInfo, PortNum, ToRadio,
    User,
};
pub use peripheral::{
    HandshakeState, PeripheralConnection, PeripheralStats, SharedPeripheral, ToRadioOutcome,
};
pub use relay::{
    HttpExecutor, HttpReply, RelayBridge, RelayClient, RelayRequest, RelayResponse, RelayStats,
    TextSender,
};

// Protocol constants re-exports
pub use packet::{MAX_DATA_PAYLOAD, MAX_TO_FROM_RADIO_SIZE, MIN_APP_VERSION};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
