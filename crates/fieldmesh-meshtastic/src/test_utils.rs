//! In-memory BLE link for exercising the central role against a real
//! peripheral
//!
//! [`MockLink`] implements [`BleLink`] by calling straight into a
//! [`SharedPeripheral`], so every ToRadio and FromRadio record crosses the
//! same encoder and parser a radio would use. FromNum changes on the
//! peripheral become [`LinkEvent::CounterNotified`] exactly as a GATT
//! notification would.
//!
//! Clones share state, so a test can keep one clone to inject faults after
//! handing the other to a transport.
//!
//! # Example
//!
//! ```rust
//! use fieldmesh_core::DeviceIdentity;
//! use fieldmesh_meshtastic::peripheral::PeripheralConnection;
//! use fieldmesh_meshtastic::test_utils::MockLink;
//!
//! let identity = DeviceIdentity { node_id: 0x1001, mac: [2, 0, 0, 0, 0x10, 0x01] };
//! let radio = PeripheralConnection::new(identity, 8).shared();
//! let link = MockLink::new(radio);
//! assert_eq!(link.candidates()[0].name.as_deref(), Some("FMESH_1001"));
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{MeshtasticError, Result};
use crate::gatt::SERVICE_UUID;
use crate::interface::{BleLink, LinkEvent, ScanCandidate};
use crate::packet::{parse_to_radio, ToRadio};
use crate::peripheral::SharedPeripheral;
use crate::relay::TextSender;

/// RSSI reported for the default candidate
pub const MOCK_RSSI: i16 = -50;

struct MockState {
    candidates: Vec<ScanCandidate>,
    connected: bool,
    characteristics: usize,
    silent_handshake: bool,
    fail_connects: u32,
    connect_count: u32,
    writes: Vec<Bytes>,
    events_tx: Option<mpsc::Sender<LinkEvent>>,
    forwarder: Option<JoinHandle<()>>,
}

impl MockState {
    fn close(&mut self) {
        self.connected = false;
        self.events_tx = None;
        if let Some(task) = self.forwarder.take() {
            task.abort();
        }
    }
}

/// [`BleLink`] backed by an in-process peripheral
#[derive(Clone)]
pub struct MockLink {
    peripheral: SharedPeripheral,
    state: Arc<Mutex<MockState>>,
    name: String,
}

impl MockLink {
    /// Link to `peripheral`, advertised under its own device name
    pub fn new(peripheral: SharedPeripheral) -> Self {
        let name = peripheral.lock().identity().advertised_name();
        let candidate = ScanCandidate {
            id: format!("mock:{}", name),
            name: Some(name.clone()),
            rssi: Some(MOCK_RSSI),
            services: vec![SERVICE_UUID],
        };
        Self {
            peripheral,
            state: Arc::new(Mutex::new(MockState {
                candidates: vec![candidate],
                connected: false,
                characteristics: 3,
                silent_handshake: false,
                fail_connects: 0,
                connect_count: 0,
                writes: Vec::new(),
                events_tx: None,
                forwarder: None,
            })),
            name,
        }
    }

    /// Replace what scans return
    pub fn with_candidates(self, candidates: Vec<ScanCandidate>) -> Self {
        self.state.lock().candidates = candidates;
        self
    }

    /// What scans return
    pub fn candidates(&self) -> Vec<ScanCandidate> {
        self.state.lock().candidates.clone()
    }

    /// How many characteristics discovery reports
    pub fn set_characteristics(&self, found: usize) {
        self.state.lock().characteristics = found;
    }

    /// Swallow config requests so the handshake never completes
    pub fn set_silent_handshake(&self, silent: bool) {
        self.state.lock().silent_handshake = silent;
    }

    /// Fail the next `count` connect attempts
    pub fn fail_next_connects(&self, count: u32) {
        self.state.lock().fail_connects = count;
    }

    /// Successful connects so far
    pub fn connect_count(&self) -> u32 {
        self.state.lock().connect_count
    }

    /// Whether the link is up
    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Every ToRadio record written, in order
    pub fn writes(&self) -> Vec<Bytes> {
        self.state.lock().writes.clone()
    }

    /// Simulate the radio going out of range
    pub fn drop_link(&self) {
        let events_tx = {
            let mut state = self.state.lock();
            let tx = state.events_tx.clone();
            state.close();
            tx
        };
        self.peripheral.lock().on_disconnect();
        if let Some(tx) = events_tx {
            let _ = tx.try_send(LinkEvent::Disconnected);
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.state.lock().connected {
            Ok(())
        } else {
            Err(MeshtasticError::Disconnected)
        }
    }
}

#[async_trait]
impl BleLink for MockLink {
    async fn scan(&mut self, _window: Duration) -> Result<Vec<ScanCandidate>> {
        Ok(self.candidates())
    }

    async fn connect(&mut self, device: &ScanCandidate) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.fail_connects > 0 {
                state.fail_connects -= 1;
                return Err(MeshtasticError::ConnectFailed {
                    device: device.id.clone(),
                    reason: "injected failure".into(),
                });
            }
            state.connected = true;
            state.connect_count += 1;
        }
        self.peripheral.lock().on_connect();
        debug!(device = %device.id, "Mock link connected");
        Ok(())
    }

    async fn request_mtu(&mut self, mtu: u16) -> Result<Option<u16>> {
        self.ensure_connected()?;
        Ok(Some(mtu))
    }

    async fn discover(&mut self) -> Result<usize> {
        self.ensure_connected()?;
        Ok(self.state.lock().characteristics)
    }

    async fn subscribe(&mut self) -> Result<mpsc::Receiver<LinkEvent>> {
        self.ensure_connected()?;
        let (tx, rx) = mpsc::channel(16);
        let mut counter_rx = self.peripheral.lock().subscribe_counter();
        let notify_tx = tx.clone();
        let forwarder = tokio::spawn(async move {
            while counter_rx.changed().await.is_ok() {
                let value = *counter_rx.borrow_and_update();
                if notify_tx.send(LinkEvent::CounterNotified(value)).await.is_err() {
                    break;
                }
            }
        });

        let mut state = self.state.lock();
        if let Some(old) = state.forwarder.replace(forwarder) {
            old.abort();
        }
        state.events_tx = Some(tx);
        Ok(rx)
    }

    async fn write_to_radio(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_connected()?;
        let silent = {
            let mut state = self.state.lock();
            state.writes.push(Bytes::copy_from_slice(data));
            state.silent_handshake
        };
        if silent && matches!(parse_to_radio(data), Some(ToRadio::WantConfigId(_))) {
            debug!("Mock link swallowed config request");
            return Ok(());
        }
        self.peripheral.lock().handle_to_radio(data);
        Ok(())
    }

    async fn read_from_radio(&mut self) -> Result<Bytes> {
        self.ensure_connected()?;
        self.peripheral.lock().read_from_radio()
    }

    async fn disconnect(&mut self) -> Result<()> {
        let was_connected = {
            let mut state = self.state.lock();
            let was = state.connected;
            state.close();
            was
        };
        if was_connected {
            self.peripheral.lock().on_disconnect();
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// [`TextSender`] that records every message and optionally forwards it
#[derive(Clone, Default)]
pub struct TextLoopback {
    sent: Arc<Mutex<Vec<(u32, String)>>>,
    forward: Option<mpsc::UnboundedSender<(u32, String)>>,
}

impl TextLoopback {
    /// Recording-only sender
    pub fn new() -> Self {
        Self::default()
    }

    /// Sender that also forwards each message to the returned receiver
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<(u32, String)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sender = Self {
            sent: Arc::default(),
            forward: Some(tx),
        };
        (sender, rx)
    }

    /// Drain recorded messages
    pub fn take(&self) -> Vec<(u32, String)> {
        std::mem::take(&mut *self.sent.lock())
    }
}

#[async_trait]
impl TextSender for TextLoopback {
    async fn send_text(&self, to: u32, text: String) -> Result<()> {
        if let Some(forward) = &self.forward {
            forward
                .send((to, text.clone()))
                .map_err(|_| MeshtasticError::ChannelClosed)?;
        }
        self.sent.lock().push((to, text));
        Ok(())
    }
}
