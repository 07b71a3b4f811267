//! In-process radio node for running the gateway without hardware
//!
//! Two mesh nodes share a simulated medium: a field device that originates
//! reports and a radio node whose BLE peripheral is reached through a
//! [`MockLink`]. The gateway sees the same FromRadio traffic it would get
//! over the air.
//!
//! ```text
//! field node ──SimMedium──► radio node ──RadioBridge──► PeripheralConnection ◄── MockLink ◄── gateway
//! ```

use fieldmesh_core::{
    derive_node_id, BinaryIncidentCodec, DeviceIdentity, Location, Priority, BROADCAST_ADDR,
};
use fieldmesh_mesh::test_utils::SimMedium;
use fieldmesh_mesh::{MeshConfig, MeshHandle, MeshProtocol, MeshService, MessageType, SystemClock};
use fieldmesh_meshtastic::test_utils::MockLink;
use fieldmesh_meshtastic::{BridgeHandle, MeshtasticConfig, PeripheralConnection, RadioBridge};
use tracing::{error, info};

use crate::error::Result;

/// Hardware address of the simulated field device
pub const FIELD_DEVICE_MAC: [u8; 6] = [0x02, 0x00, 0xf1, 0xe1, 0xd0, 0x01];

/// A running simulated radio node plus one field device in range
pub struct SimulatedRadio {
    /// BLE link to the radio node's peripheral
    pub link: MockLink,
    /// Mesh handle of the radio node
    pub radio_node: MeshHandle,
    /// Mesh handle of the field device
    pub field_node: MeshHandle,
    /// Radio node's mesh-to-BLE bridge
    pub bridge: BridgeHandle,
    /// Shared medium, for adding nodes
    pub medium: SimMedium,
}

impl SimulatedRadio {
    /// Spawn both nodes and the bridge on the current runtime
    pub fn spawn(identity: DeviceIdentity, mesh: &MeshConfig, meshtastic: &MeshtasticConfig) -> Self {
        let medium = SimMedium::new();
        let field_id = derive_node_id(FIELD_DEVICE_MAC);
        medium.link(identity.node_id, field_id);

        let radio_node = spawn_node(&medium, identity.node_id, mesh);
        let field_node = spawn_node(&medium, field_id, mesh);

        let peripheral =
            PeripheralConnection::new(identity, meshtastic.peripheral.queue_capacity).shared();
        let (bridge, bridge_handle) =
            RadioBridge::new(radio_node.clone(), peripheral.clone(), &meshtastic.peripheral);
        tokio::spawn(async move {
            if let Err(e) = bridge.run().await {
                error!("Radio bridge error: {}", e);
            }
        });

        info!(
            radio = %identity,
            name = %identity.advertised_name(),
            field = %format!("0x{:08x}", field_id),
            "Simulated radio node running"
        );

        Self {
            link: MockLink::new(peripheral),
            radio_node,
            field_node,
            bridge: bridge_handle,
            medium,
        }
    }

    /// Originate an incident from the field device
    pub async fn report(
        &self,
        description: &str,
        location: Location,
        priority: Priority,
    ) -> Result<bool> {
        let blob =
            BinaryIncidentCodec::encode(description, location, FIELD_DEVICE_MAC, priority, None)?;
        let accepted = self
            .field_node
            .send(BROADCAST_ADDR, MessageType::Incident, priority, blob)
            .await?;
        Ok(accepted)
    }

    /// Stop both mesh nodes and the bridge
    pub async fn shutdown(&self) {
        let _ = self.bridge.shutdown().await;
        let _ = self.field_node.shutdown().await;
        let _ = self.radio_node.shutdown().await;
    }
}

fn spawn_node(medium: &SimMedium, node_id: u32, config: &MeshConfig) -> MeshHandle {
    let protocol = MeshProtocol::new(node_id, medium.radio(node_id), SystemClock, config.clone());
    let (service, handle) = MeshService::new(protocol);
    tokio::spawn(async move {
        if let Err(e) = service.run().await {
            error!(node = %format!("0x{:08x}", node_id), "Mesh service error: {}", e);
        }
    });
    handle
}
