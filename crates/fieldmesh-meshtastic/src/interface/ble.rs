//! btleplug-backed [`BleLink`]
//!
//! # Requirements
//!
//! Enable the `ble` feature in Cargo.toml to use this link.
//!
//! On Linux, you'll also need:
//! ```bash
//! apt install libdbus-1-dev
//! ```

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent as AdapterEvent, Characteristic as GattCharacteristic, Manager as _,
    Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use super::{BleLink, LinkEvent, ScanCandidate};
use crate::error::{MeshtasticError, Result};
use crate::gatt::{Characteristic, FROM_NUM_UUID, SERVICE_UUID};

/// BLE central link to a Meshtastic-service peripheral
pub struct BtleplugLink {
    adapter_index: usize,
    adapter: Option<Adapter>,
    scanned: Vec<(String, Peripheral)>,
    peripheral: Option<Peripheral>,
    to_radio: Option<GattCharacteristic>,
    from_radio: Option<GattCharacteristic>,
    from_num: Option<GattCharacteristic>,
    event_task: Option<JoinHandle<()>>,
    name: String,
}

impl BtleplugLink {
    /// Link on the first adapter
    pub fn new() -> Self {
        Self::with_adapter(0)
    }

    /// Link on the adapter at `index`
    pub fn with_adapter(index: usize) -> Self {
        Self {
            adapter_index: index,
            adapter: None,
            scanned: Vec::new(),
            peripheral: None,
            to_radio: None,
            from_radio: None,
            from_num: None,
            event_task: None,
            name: format!("ble:hci{}", index),
        }
    }

    async fn adapter(&mut self) -> Result<Adapter> {
        if let Some(adapter) = &self.adapter {
            return Ok(adapter.clone());
        }
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .nth(self.adapter_index)
            .ok_or_else(|| {
                MeshtasticError::ScanFailed(format!("no BLE adapter at index {}", self.adapter_index))
            })?;
        self.adapter = Some(adapter.clone());
        Ok(adapter)
    }

    fn peripheral(&self) -> Result<&Peripheral> {
        self.peripheral.as_ref().ok_or(MeshtasticError::Disconnected)
    }

    fn characteristic(
        slot: &Option<GattCharacteristic>,
        which: Characteristic,
    ) -> Result<&GattCharacteristic> {
        slot.as_ref().ok_or_else(|| {
            MeshtasticError::Internal(format!("{} characteristic not discovered", which))
        })
    }

    fn clear_session(&mut self) {
        if let Some(task) = self.event_task.take() {
            task.abort();
        }
        self.to_radio = None;
        self.from_radio = None;
        self.from_num = None;
    }
}

impl Default for BtleplugLink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BleLink for BtleplugLink {
    async fn scan(&mut self, window: Duration) -> Result<Vec<ScanCandidate>> {
        let adapter = self.adapter().await?;
        adapter
            .start_scan(ScanFilter {
                services: vec![SERVICE_UUID],
            })
            .await
            .map_err(|e| MeshtasticError::ScanFailed(e.to_string()))?;
        tokio::time::sleep(window).await;
        if let Err(e) = adapter.stop_scan().await {
            debug!("stop_scan failed: {}", e);
        }

        let mut candidates = Vec::new();
        self.scanned.clear();
        for peripheral in adapter.peripherals().await? {
            let Some(props) = peripheral.properties().await? else {
                continue;
            };
            let id = props.address.to_string();
            trace!(id = %id, name = ?props.local_name, rssi = ?props.rssi, "Scan result");
            candidates.push(ScanCandidate {
                id: id.clone(),
                name: props.local_name,
                rssi: props.rssi,
                services: props.services,
            });
            self.scanned.push((id, peripheral));
        }
        debug!(found = candidates.len(), "Scan finished");
        Ok(candidates)
    }

    async fn connect(&mut self, device: &ScanCandidate) -> Result<()> {
        self.clear_session();
        let peripheral = self
            .scanned
            .iter()
            .find(|(id, _)| *id == device.id)
            .map(|(_, p)| p.clone())
            .ok_or_else(|| MeshtasticError::ConnectFailed {
                device: device.id.clone(),
                reason: "not in last scan".into(),
            })?;

        if !peripheral.is_connected().await? {
            peripheral
                .connect()
                .await
                .map_err(|e| MeshtasticError::ConnectFailed {
                    device: device.id.clone(),
                    reason: e.to_string(),
                })?;
        }
        info!(device = %device.id, "BLE connected");
        self.peripheral = Some(peripheral);
        Ok(())
    }

    async fn request_mtu(&mut self, mtu: u16) -> Result<Option<u16>> {
        self.peripheral()?;
        // btleplug negotiates the MTU inside the platform stack
        debug!(mtu, "MTU request left to the platform");
        Ok(None)
    }

    async fn discover(&mut self) -> Result<usize> {
        let peripheral = self.peripheral()?.clone();
        peripheral.discover_services().await?;

        for characteristic in peripheral.characteristics() {
            if characteristic.service_uuid != SERVICE_UUID {
                continue;
            }
            match Characteristic::from_uuid(&characteristic.uuid) {
                Some(Characteristic::ToRadio) => self.to_radio = Some(characteristic),
                Some(Characteristic::FromRadio) => self.from_radio = Some(characteristic),
                Some(Characteristic::FromNum) => self.from_num = Some(characteristic),
                None => {}
            }
        }

        let found = [&self.to_radio, &self.from_radio, &self.from_num]
            .iter()
            .filter(|c| c.is_some())
            .count();
        debug!(found, "Characteristics discovered");
        Ok(found)
    }

    async fn subscribe(&mut self) -> Result<mpsc::Receiver<LinkEvent>> {
        let peripheral = self.peripheral()?.clone();
        let from_num = Self::characteristic(&self.from_num, Characteristic::FromNum)?.clone();
        let adapter = self.adapter().await?;

        let mut notifications = peripheral.notifications().await?;
        peripheral.subscribe(&from_num).await?;
        let mut adapter_events = adapter.events().await?;
        let peripheral_id = peripheral.id();

        let (tx, rx) = mpsc::channel(32);
        let task = tokio::spawn(async move {
            let mut adapter_open = true;
            loop {
                tokio::select! {
                    notification = notifications.next() => match notification {
                        Some(n) if n.uuid == FROM_NUM_UUID => {
                            let counter = n
                                .value
                                .get(..4)
                                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                                .unwrap_or(0);
                            if tx.send(LinkEvent::CounterNotified(counter)).await.is_err() {
                                break;
                            }
                        }
                        Some(_) => {}
                        None => {
                            let _ = tx.send(LinkEvent::Disconnected).await;
                            break;
                        }
                    },
                    event = adapter_events.next(), if adapter_open => match event {
                        Some(AdapterEvent::DeviceDisconnected(id)) if id == peripheral_id => {
                            let _ = tx.send(LinkEvent::Disconnected).await;
                            break;
                        }
                        Some(_) => {}
                        None => adapter_open = false,
                    },
                }
            }
        });

        if let Some(old) = self.event_task.replace(task) {
            old.abort();
        }
        Ok(rx)
    }

    async fn write_to_radio(&mut self, data: &[u8]) -> Result<()> {
        let peripheral = self.peripheral()?;
        let to_radio = Self::characteristic(&self.to_radio, Characteristic::ToRadio)?;
        peripheral
            .write(to_radio, data, WriteType::WithResponse)
            .await
            .map_err(|e| MeshtasticError::WriteError(e.to_string()))
    }

    async fn read_from_radio(&mut self) -> Result<Bytes> {
        let peripheral = self.peripheral()?;
        let from_radio = Self::characteristic(&self.from_radio, Characteristic::FromRadio)?;
        peripheral
            .read(from_radio)
            .await
            .map(Bytes::from)
            .map_err(|e| MeshtasticError::ReadError(e.to_string()))
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.clear_session();
        if let Some(peripheral) = self.peripheral.take() {
            if peripheral.is_connected().await.unwrap_or(false) {
                peripheral.disconnect().await?;
                info!("BLE disconnected");
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
