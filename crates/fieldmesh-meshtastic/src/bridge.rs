//! RadioBridge - couples the mesh service with the BLE peripheral
//!
//! Runs on a radio node that also serves a companion over BLE:
//!
//! - mesh -> companion: delivered INCIDENT envelopes are queued on the
//!   peripheral as PRIVATE_APP packets, `from` set to the originating node
//! - companion -> mesh: PRIVATE_APP payloads written by the companion are
//!   originated as broadcast INCIDENT envelopes
//!
//! Chat text from the companion is left on the peripheral for the
//! application; it is not put on the mesh.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐  MeshEvent   ┌─────────────┐  queue_payload  ┌────────────────────┐
//! │ MeshService│─────────────►│ RadioBridge │────────────────►│ PeripheralConnection│
//! │            │◄─────────────│             │◄────────────────│   (GATT glue)       │
//! └────────────┘  send()      └─────────────┘  take_payload   └────────────────────┘
//! ```

use bytes::Bytes;
use fieldmesh_core::{BinaryIncidentCodec, Priority, BROADCAST_ADDR};
use fieldmesh_mesh::{MeshEvent, MeshHandle, MessageType};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::config::PeripheralConfig;
use crate::error::{MeshtasticError, Result};
use crate::peripheral::SharedPeripheral;

/// Commands that can be sent to the bridge
#[derive(Debug)]
pub enum BridgeCommand {
    /// Get bridge statistics
    GetStats(oneshot::Sender<BridgeStats>),
    /// Shutdown the bridge
    Shutdown,
}

/// Bridge statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Incidents queued for the companion
    pub mesh_to_companion: u64,
    /// Companion payloads originated on the mesh
    pub companion_to_mesh: u64,
    /// Originations the mesh refused
    pub mesh_send_failures: u64,
    /// Mesh events missed because the bridge lagged
    pub lagged_events: u64,
}

/// Handle for controlling the RadioBridge
#[derive(Clone)]
pub struct BridgeHandle {
    command_tx: mpsc::Sender<BridgeCommand>,
}

impl BridgeHandle {
    /// Get bridge statistics
    pub async fn stats(&self) -> Result<BridgeStats> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(BridgeCommand::GetStats(tx))
            .await
            .map_err(|_| MeshtasticError::ChannelClosed)?;
        rx.await.map_err(|_| MeshtasticError::ChannelClosed)
    }

    /// Shutdown the bridge
    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(BridgeCommand::Shutdown)
            .await
            .map_err(|_| MeshtasticError::ChannelClosed)
    }
}

/// Moves incident traffic between the mesh and a BLE companion
pub struct RadioBridge {
    mesh: MeshHandle,
    peripheral: SharedPeripheral,
    poll_interval: Duration,
    command_rx: mpsc::Receiver<BridgeCommand>,
    stats: BridgeStats,
}

impl RadioBridge {
    /// Create a bridge over a running mesh service
    pub fn new(
        mesh: MeshHandle,
        peripheral: SharedPeripheral,
        config: &PeripheralConfig,
    ) -> (Self, BridgeHandle) {
        let (command_tx, command_rx) = mpsc::channel(16);
        let bridge = Self {
            mesh,
            peripheral,
            poll_interval: config.bridge_poll_interval,
            command_rx,
            stats: BridgeStats::default(),
        };
        (bridge, BridgeHandle { command_tx })
    }

    /// Run until shutdown or until the mesh service stops
    pub async fn run(mut self) -> Result<()> {
        info!(node = %format!("0x{:08x}", self.mesh.node_id()), "Starting radio bridge");
        let mut events = self.mesh.subscribe();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => {
                        self.handle_event(&event);
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Bridge lagged behind mesh events");
                        self.stats.lagged_events += missed;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Mesh event stream closed");
                        break;
                    }
                },

                _ = ticker.tick() => {
                    self.forward_inbound().await;
                }

                Some(cmd) = self.command_rx.recv() => match cmd {
                    BridgeCommand::GetStats(tx) => {
                        let _ = tx.send(self.stats.clone());
                    }
                    BridgeCommand::Shutdown => {
                        info!("Bridge shutdown requested");
                        break;
                    }
                },
            }
        }

        info!("Radio bridge stopped");
        Ok(())
    }

    /// Queue a delivered incident for the companion; returns whether it was
    pub fn handle_event(&mut self, event: &MeshEvent) -> bool {
        let MeshEvent::Delivered { envelope, .. } = event else {
            return false;
        };
        if envelope.message_type != MessageType::Incident {
            trace!(kind = ?envelope.message_type, "Not bridging to companion");
            return false;
        }

        let counter = self
            .peripheral
            .lock()
            .queue_payload(envelope.source, envelope.payload.clone());
        self.stats.mesh_to_companion += 1;
        debug!(
            source = %format!("0x{:08x}", envelope.source),
            seq = envelope.sequence,
            notify = ?counter,
            "Incident queued for companion"
        );
        true
    }

    /// Originate every payload the companion wrote; returns how many the
    /// mesh accepted
    pub async fn forward_inbound(&mut self) -> usize {
        let mut accepted = 0;
        loop {
            let next = self.peripheral.lock().take_payload();
            let Some(inbound) = next else {
                break;
            };

            let priority = payload_priority(&inbound.payload);
            match self
                .mesh
                .send(BROADCAST_ADDR, MessageType::Incident, priority, inbound.payload)
                .await
            {
                Ok(true) => {
                    accepted += 1;
                    self.stats.companion_to_mesh += 1;
                }
                Ok(false) => {
                    warn!("Mesh refused companion payload");
                    self.stats.mesh_send_failures += 1;
                }
                Err(e) => {
                    warn!("Mesh service unavailable: {}", e);
                    self.stats.mesh_send_failures += 1;
                    break;
                }
            }
        }
        accepted
    }
}

/// Priority carried in an incident blob, MEDIUM if it is not one
fn payload_priority(payload: &Bytes) -> Priority {
    BinaryIncidentCodec::decode(payload)
        .map(|incident| incident.priority)
        .unwrap_or(Priority::Medium)
}
