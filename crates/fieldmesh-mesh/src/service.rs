//! Mesh service - async driver for the flood-routing protocol
//!
//! The `MeshService` owns a [`MeshProtocol`] and runs it on a single task:
//! polling the radio, firing heartbeats and maintenance on their intervals,
//! and serving commands from any number of [`MeshHandle`]s. Deliveries are
//! published as [`MeshEvent`]s on a broadcast channel.

use bytes::Bytes;
use fieldmesh_core::Priority;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::envelope::MessageType;
use crate::error::{MeshError, Result};
use crate::event::MeshEvent;
use crate::protocol::{MeshProtocol, MeshStats};
use crate::radio::{Clock, Radio};
use crate::routing::RouteEntry;
use crate::summary::IncidentSummary;

/// Commands sent to the mesh service
#[derive(Debug)]
pub enum MeshCommand {
    /// Originate an envelope
    Send {
        destination: u32,
        message_type: MessageType,
        priority: Priority,
        payload: Bytes,
        response: oneshot::Sender<bool>,
    },
    /// Originate an incident summary
    SendIncident {
        destination: u32,
        priority: Priority,
        summary: IncidentSummary,
        response: oneshot::Sender<bool>,
    },
    /// Get protocol counters
    GetStats { response: oneshot::Sender<MeshStats> },
    /// Get live routes
    GetRoutes { response: oneshot::Sender<Vec<RouteEntry>> },
    /// Shutdown
    Shutdown,
}

/// Handle for interacting with the mesh service
#[derive(Clone)]
pub struct MeshHandle {
    command_tx: mpsc::Sender<MeshCommand>,
    event_tx: broadcast::Sender<MeshEvent>,
    node_id: u32,
}

impl MeshHandle {
    /// Our node address
    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    /// Subscribe to mesh events
    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.event_tx.subscribe()
    }

    /// Originate an envelope; resolves to whether the radio accepted it
    pub async fn send(
        &self,
        destination: u32,
        message_type: MessageType,
        priority: Priority,
        payload: Bytes,
    ) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(MeshCommand::Send {
                destination,
                message_type,
                priority,
                payload,
                response: tx,
            })
            .await
            .map_err(|_| MeshError::ServiceStopped)?;

        rx.await.map_err(|_| MeshError::Channel("Failed to receive send result".into()))
    }

    /// Originate an incident summary
    pub async fn send_incident(
        &self,
        destination: u32,
        priority: Priority,
        summary: IncidentSummary,
    ) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(MeshCommand::SendIncident {
                destination,
                priority,
                summary,
                response: tx,
            })
            .await
            .map_err(|_| MeshError::ServiceStopped)?;

        rx.await.map_err(|_| MeshError::Channel("Failed to receive send result".into()))
    }

    /// Get protocol counters
    pub async fn stats(&self) -> Result<MeshStats> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(MeshCommand::GetStats { response: tx })
            .await
            .map_err(|_| MeshError::ServiceStopped)?;

        rx.await.map_err(|_| MeshError::Channel("Failed to receive stats".into()))
    }

    /// Get live routes
    pub async fn routes(&self) -> Result<Vec<RouteEntry>> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(MeshCommand::GetRoutes { response: tx })
            .await
            .map_err(|_| MeshError::ServiceStopped)?;

        rx.await.map_err(|_| MeshError::Channel("Failed to receive routes".into()))
    }

    /// Shutdown the mesh service
    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(MeshCommand::Shutdown)
            .await
            .map_err(|_| MeshError::ServiceStopped)
    }
}

/// Async driver for one mesh node
pub struct MeshService<R: Radio, C: Clock> {
    protocol: MeshProtocol<R, C>,
    event_tx: broadcast::Sender<MeshEvent>,
    command_rx: mpsc::Receiver<MeshCommand>,
}

impl<R: Radio, C: Clock> MeshService<R, C> {
    /// Create a service around a protocol instance
    pub fn new(protocol: MeshProtocol<R, C>) -> (Self, MeshHandle) {
        let (event_tx, _) = broadcast::channel(256);
        let (command_tx, command_rx) = mpsc::channel(64);

        let handle = MeshHandle {
            command_tx,
            event_tx: event_tx.clone(),
            node_id: protocol.node_id(),
        };

        let service = Self {
            protocol,
            event_tx,
            command_rx,
        };

        (service, handle)
    }

    /// Run until shutdown or until every handle is dropped
    pub async fn run(mut self) -> Result<()> {
        let config = self.protocol.config().clone();
        info!(
            node = format_args!("0x{:08x}", self.protocol.node_id()),
            heartbeat = %humantime::format_duration(config.heartbeat_interval),
            "Starting mesh service"
        );

        let mut poll = interval(config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First heartbeat and sweep one full period after start
        let mut heartbeat = interval_at(
            Instant::now() + config.heartbeat_interval,
            config.heartbeat_interval,
        );
        let mut maintenance = interval_at(
            Instant::now() + config.maintenance_interval,
            config.maintenance_interval,
        );

        let _ = self.event_tx.send(MeshEvent::Started {
            node_id: self.protocol.node_id(),
        });

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    if self.protocol.poll() > 0 {
                        self.publish_deliveries();
                    }
                }

                _ = heartbeat.tick() => {
                    self.protocol.send_heartbeat();
                }

                _ = maintenance.tick() => {
                    self.protocol.maintenance();
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if !self.handle_command(cmd) {
                                break;
                            }
                        }
                        None => {
                            debug!("All mesh handles dropped");
                            break;
                        }
                    }
                }
            }
        }

        let _ = self.event_tx.send(MeshEvent::Stopped);
        info!("Mesh service stopped");
        Ok(())
    }

    fn publish_deliveries(&mut self) {
        while let Some(envelope) = self.protocol.take() {
            let _ = self.event_tx.send(MeshEvent::from_delivery(envelope));
        }
    }

    /// Handle a command, returns false if should shutdown
    fn handle_command(&mut self, cmd: MeshCommand) -> bool {
        match cmd {
            MeshCommand::Send {
                destination,
                message_type,
                priority,
                payload,
                response,
            } => {
                let sent = self
                    .protocol
                    .send(destination, message_type, priority, payload);
                let _ = response.send(sent);
            }

            MeshCommand::SendIncident {
                destination,
                priority,
                summary,
                response,
            } => {
                let sent = self.protocol.send_incident(destination, priority, &summary);
                let _ = response.send(sent);
            }

            MeshCommand::GetStats { response } => {
                let _ = response.send(self.protocol.stats());
            }

            MeshCommand::GetRoutes { response } => {
                let _ = response.send(self.protocol.routes());
            }

            MeshCommand::Shutdown => {
                info!("Shutting down mesh service");
                return false;
            }
        }
        true
    }
}
