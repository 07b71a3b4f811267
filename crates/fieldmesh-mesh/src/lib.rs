//! Fieldmesh Mesh - flood-routing protocol for LoRa incident nodes
//!
//! This crate carries incident reports, heartbeats and acknowledgements
//! across a multi-hop radio mesh with no infrastructure.
//!
//! # Overview
//!
//! - **Envelope**: 22-byte big-endian header plus payload, capped at the
//!   237-byte LoRa MTU
//! - **Flooding**: every node relays broadcasts once, bounded by a hop limit
//!   and a time-to-live
//! - **Dedup**: `(source, sequence)` pairs are remembered for five minutes
//! - **Routing**: the neighbour a packet was heard from becomes the next hop
//!   toward its originator
//! - **Acknowledgements**: unicast deliveries are answered with an ACK
//!
//! The radio and clock are traits, so the same protocol runs over real
//! hardware, a simulated medium or a hand-driven clock.
//!
//! # Example
//!
//! ```rust,no_run
//! use fieldmesh_core::{Priority, BROADCAST_ADDR};
//! use fieldmesh_mesh::test_utils::SimMedium;
//! use fieldmesh_mesh::{IncidentSummary, MeshConfig, MeshProtocol, MeshService, SystemClock};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let medium = SimMedium::new();
//!     let protocol = MeshProtocol::new(
//!         0x1001,
//!         medium.radio(0x1001),
//!         SystemClock,
//!         MeshConfig::default(),
//!     );
//!
//!     let (service, handle) = MeshService::new(protocol);
//!     let mut events = handle.subscribe();
//!     tokio::spawn(service.run());
//!
//!     let summary = IncidentSummary::new(52.52, 13.405, 34.5, "Drone spotted");
//!     handle.send_incident(BROADCAST_ADDR, Priority::High, summary).await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

// Wire format
pub mod envelope;
pub mod summary;

// Protocol
pub mod config;
pub mod dedup;
pub mod protocol;
pub mod radio;
pub mod routing;

// Async driver
pub mod event;
pub mod service;

pub mod error;
pub mod test_utils;

// Re-exports
pub use config::{MeshConfig, DEFAULT_TTL, LORA_MAX_PAYLOAD, MAX_HOPS};
pub use dedup::{DedupCache, DedupStats};
pub use envelope::{MeshEnvelope, MessageType, ENVELOPE_HEADER_SIZE, MAX_ENVELOPE_PAYLOAD};
pub use error::{MeshError, Result};
pub use event::MeshEvent;
pub use protocol::{acked_sequence, FrameOutcome, MeshProtocol, MeshStats};
pub use radio::{Clock, ManualClock, Radio, ReceivedFrame, SystemClock};
pub use routing::{RouteEntry, RoutingTable};
pub use service::{MeshCommand, MeshHandle, MeshService};
pub use summary::{IncidentSummary, MAX_SUMMARY_DESCRIPTION};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
