//! BLE link abstraction for the central role
//!
//! [`BleLink`] is the seam between the central state machine and a real
//! Bluetooth stack:
//!
//! - [`BtleplugLink`] - btleplug-backed link (requires `ble` feature)
//! - `test_utils::MockLink` - in-memory link wired to a peripheral
//!
//! # Feature Requirements
//!
//! - `ble`: Requires BlueZ development files on Linux
//!   ```bash
//!   apt install libdbus-1-dev
//!   ```

#[cfg(feature = "ble")]
mod ble;
#[cfg(feature = "ble")]
pub use ble::BtleplugLink;

use async_trait::async_trait;
use bytes::Bytes;
use fieldmesh_core::matches_device_name;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::Result;
use crate::gatt::SERVICE_UUID;

/// A device seen during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCandidate {
    /// Stack-specific device identifier
    pub id: String,
    /// Advertised local name
    pub name: Option<String>,
    /// Signal strength in dBm
    pub rssi: Option<i16>,
    /// Advertised service UUIDs
    pub services: Vec<Uuid>,
}

impl ScanCandidate {
    /// Advertises the Meshtastic service under a fieldmesh name
    pub fn is_fieldmesh_device(&self) -> bool {
        self.services.contains(&SERVICE_UUID)
            && self.name.as_deref().is_some_and(matches_device_name)
    }
}

/// Strongest-signal fieldmesh device among the candidates
///
/// Candidates without an RSSI rank below any with one.
pub fn select_strongest(candidates: &[ScanCandidate]) -> Option<&ScanCandidate> {
    candidates
        .iter()
        .filter(|c| c.is_fieldmesh_device())
        .max_by_key(|c| c.rssi.unwrap_or(i16::MIN))
}

/// Asynchronous link notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// The FromNum counter changed
    CounterNotified(u32),
    /// The peer went away
    Disconnected,
}

/// Central-side BLE operations against one Meshtastic peripheral
///
/// Implementations hold at most one connection at a time.
#[async_trait]
pub trait BleLink: Send + Sync {
    /// Scan for `window` and return everything seen
    async fn scan(&mut self, window: Duration) -> Result<Vec<ScanCandidate>>;

    /// Connect to a scanned device
    async fn connect(&mut self, device: &ScanCandidate) -> Result<()>;

    /// Ask for a larger MTU; returns the negotiated value if known
    async fn request_mtu(&mut self, mtu: u16) -> Result<Option<u16>>;

    /// Discover the Meshtastic service; returns how many of the three
    /// characteristics were found
    async fn discover(&mut self) -> Result<usize>;

    /// Subscribe to FromNum notifications and disconnect events
    async fn subscribe(&mut self) -> Result<mpsc::Receiver<LinkEvent>>;

    /// Write a `ToRadio` record
    async fn write_to_radio(&mut self, data: &[u8]) -> Result<()>;

    /// Read one `FromRadio` record; empty means nothing pending
    async fn read_from_radio(&mut self) -> Result<Bytes>;

    /// Drop the connection
    async fn disconnect(&mut self) -> Result<()>;

    /// Get the link name (for logging)
    fn name(&self) -> &str;
}

/// Central connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected, not trying
    Idle,
    /// Looking for a device
    Scanning,
    /// Link setup in progress
    Connecting,
    /// Waiting for the config handshake
    Configuring,
    /// Handshake done, exchanging packets
    Ready,
    /// Last attempt failed, reconnect pending
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Scanning => write!(f, "scanning"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Configuring => write!(f, "configuring"),
            ConnectionState::Ready => write!(f, "ready"),
            ConnectionState::Error => write!(f, "error"),
        }
    }
}
