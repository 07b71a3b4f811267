//! Peripheral role: the radio node's side of the Meshtastic BLE protocol
//!
//! A [`PeripheralConnection`] holds everything that belongs to one BLE
//! connection: the config handshake position, the client nonce, the
//! outbound `FromRadio` FIFO and the queues of records the companion wrote.
//! The GATT server glue calls into it from its write/read callbacks and
//! pushes FromNum notifications whenever [`PeripheralConnection::counter`]
//! changes.
//!
//! # Handshake
//!
//! ```text
//! SendNothing --want_config_id--> SendMyInfo --read--> SendOwnNodeInfo
//!     --read--> SendCompleteId --read--> SendPackets
//! ```
//!
//! In `SendPackets` each read drains one queued packet; an empty read
//! means nothing is pending. Connect, disconnect and a `ToRadio`
//! disconnect request all return to `SendNothing`.

use bytes::Bytes;
use fieldmesh_core::DeviceIdentity;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::error::Result;
use crate::packet::{
    check_payload, encode_config_complete, encode_from_radio_packet, encode_my_info,
    encode_node_info, parse_to_radio, DataPacket, MeshPacket, MyNodeInfo, NodeInfo, PortNum, ToRadio, User,
    MIN_APP_VERSION,
};

/// Default depth of each per-connection queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Peripheral connection shared between the GATT glue and the bridge
pub type SharedPeripheral = Arc<parking_lot::Mutex<PeripheralConnection>>;

/// Position in the config handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// No config requested yet
    SendNothing,
    /// Next read returns MyNodeInfo
    SendMyInfo,
    /// Next read returns our NodeInfo
    SendOwnNodeInfo,
    /// Next read returns config_complete_id
    SendCompleteId,
    /// Steady state
    SendPackets,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeState::SendNothing => write!(f, "SEND_NOTHING"),
            HandshakeState::SendMyInfo => write!(f, "SEND_MY_INFO"),
            HandshakeState::SendOwnNodeInfo => write!(f, "SEND_OWN_NODEINFO"),
            HandshakeState::SendCompleteId => write!(f, "SEND_COMPLETE_ID"),
            HandshakeState::SendPackets => write!(f, "SEND_PACKETS"),
        }
    }
}

/// Result of handling one `ToRadio` write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToRadioOutcome {
    /// Handshake (re)started; the counter was bumped to this value
    ConfigStarted {
        /// New FromNum value
        counter: u32,
    },
    /// A private-port payload was queued for the application
    PayloadQueued,
    /// A chat text was queued
    TextQueued,
    /// A packet on a port we do not handle
    IgnoredPort(PortNum),
    /// The companion asked to disconnect
    Disconnected,
    /// Undecodable or empty write
    Malformed,
}

/// Private-port payload written by the companion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPayload {
    /// `MeshPacket.from` as the companion set it
    pub from: u32,
    /// `MeshPacket.to`
    pub to: u32,
    /// Payload bytes
    pub payload: Bytes,
}

/// Chat text written by the companion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundText {
    /// `MeshPacket.from`
    pub from: u32,
    /// `MeshPacket.to`
    pub to: u32,
    /// Message text
    pub text: String,
}

/// Per-connection counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeripheralStats {
    /// Connections seen
    pub connections: u64,
    /// Handshakes that reached steady state
    pub handshakes_completed: u64,
    /// Packets queued for the companion
    pub packets_queued: u64,
    /// Packets dropped because the FIFO was full
    pub packets_dropped: u64,
    /// Packets refused because their payload exceeds the Data limit
    pub packets_rejected: u64,
    /// Private payloads received
    pub payloads_received: u64,
    /// Texts received
    pub texts_received: u64,
    /// Writes that did not decode
    pub malformed_writes: u64,
}

/// Peripheral-side connection state
pub struct PeripheralConnection {
    identity: DeviceIdentity,
    long_name: String,
    state: HandshakeState,
    nonce: u32,
    capacity: usize,
    outbound: VecDeque<MeshPacket>,
    payloads: VecDeque<InboundPayload>,
    texts: VecDeque<InboundText>,
    record_id: u32,
    next_packet_id: u32,
    counter_tx: watch::Sender<u32>,
    stats: PeripheralStats,
}

impl PeripheralConnection {
    /// Create for a device identity
    pub fn new(identity: DeviceIdentity, capacity: usize) -> Self {
        let (counter_tx, _) = watch::channel(0);
        Self {
            long_name: identity.advertised_name(),
            identity,
            state: HandshakeState::SendNothing,
            nonce: 0,
            capacity: capacity.max(1),
            outbound: VecDeque::new(),
            payloads: VecDeque::new(),
            texts: VecDeque::new(),
            record_id: 0,
            next_packet_id: rand::random(),
            counter_tx,
            stats: PeripheralStats::default(),
        }
    }

    /// Wrap for sharing
    pub fn shared(self) -> SharedPeripheral {
        Arc::new(parking_lot::Mutex::new(self))
    }

    /// Our node number
    pub fn node_num(&self) -> u32 {
        self.identity.node_id
    }

    /// Identity we advertise and report
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Handshake position
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Whether the handshake has finished
    pub fn is_ready(&self) -> bool {
        self.state == HandshakeState::SendPackets
    }

    /// Current FromNum value
    pub fn counter(&self) -> u32 {
        *self.counter_tx.borrow()
    }

    /// Watch FromNum changes; the GATT glue turns them into notifications
    pub fn subscribe_counter(&self) -> watch::Receiver<u32> {
        self.counter_tx.subscribe()
    }

    /// Outbound packets waiting to be read
    pub fn pending(&self) -> usize {
        self.outbound.len()
    }

    /// Counter snapshot
    pub fn stats(&self) -> PeripheralStats {
        self.stats.clone()
    }

    fn bump_counter(&mut self) -> u32 {
        let next = self.counter().wrapping_add(1);
        self.counter_tx.send_replace(next);
        next
    }

    fn reset(&mut self) {
        self.state = HandshakeState::SendNothing;
        self.nonce = 0;
    }

    // ===== Connection lifecycle =====

    /// A central connected; always restarts the handshake
    pub fn on_connect(&mut self) {
        self.reset();
        self.stats.connections += 1;
        info!(node = %self.identity, "Companion connected");
    }

    /// The central went away
    pub fn on_disconnect(&mut self) {
        self.reset();
        info!(node = %self.identity, "Companion disconnected");
    }

    // ===== ToRadio =====

    /// Handle one write to the ToRadio characteristic
    pub fn handle_to_radio(&mut self, data: &[u8]) -> ToRadioOutcome {
        let Some(message) = parse_to_radio(data) else {
            debug!("Ignoring undecodable ToRadio ({} bytes)", data.len());
            self.stats.malformed_writes += 1;
            return ToRadioOutcome::Malformed;
        };

        match message {
            ToRadio::WantConfigId(nonce) => {
                self.nonce = nonce;
                self.state = HandshakeState::SendMyInfo;
                let counter = self.bump_counter();
                debug!(nonce, "Config requested");
                ToRadioOutcome::ConfigStarted { counter }
            }
            ToRadio::Disconnect => {
                self.reset();
                ToRadioOutcome::Disconnected
            }
            ToRadio::Packet(packet) => self.accept_packet(packet),
        }
    }

    fn accept_packet(&mut self, packet: MeshPacket) -> ToRadioOutcome {
        let Some(decoded) = packet.decoded else {
            self.stats.malformed_writes += 1;
            return ToRadioOutcome::Malformed;
        };

        match decoded.portnum {
            PortNum::Private => {
                push_bounded(
                    &mut self.payloads,
                    InboundPayload {
                        from: packet.from,
                        to: packet.to,
                        payload: decoded.payload,
                    },
                    self.capacity,
                );
                self.stats.payloads_received += 1;
                ToRadioOutcome::PayloadQueued
            }
            PortNum::TextMessage => {
                let text = String::from_utf8_lossy(&decoded.payload).into_owned();
                trace!(len = text.len(), "Companion text");
                push_bounded(
                    &mut self.texts,
                    InboundText {
                        from: packet.from,
                        to: packet.to,
                        text,
                    },
                    self.capacity,
                );
                self.stats.texts_received += 1;
                ToRadioOutcome::TextQueued
            }
            other => {
                debug!(port = %other, "Ignoring packet on unhandled port");
                ToRadioOutcome::IgnoredPort(other)
            }
        }
    }

    /// Take the oldest private payload
    pub fn take_payload(&mut self) -> Option<InboundPayload> {
        self.payloads.pop_front()
    }

    /// Take the oldest chat text
    pub fn take_text(&mut self) -> Option<InboundText> {
        self.texts.pop_front()
    }

    // ===== FromRadio =====

    /// Produce the next FromRadio record; empty means nothing now
    pub fn read_from_radio(&mut self) -> Result<Bytes> {
        let record = match self.state {
            HandshakeState::SendNothing => return Ok(Bytes::new()),
            HandshakeState::SendMyInfo => {
                let info = MyNodeInfo {
                    my_node_num: self.identity.node_id,
                    min_app_version: MIN_APP_VERSION,
                };
                let record = encode_my_info(self.next_record_id(), &info)?;
                self.state = HandshakeState::SendOwnNodeInfo;
                record
            }
            HandshakeState::SendOwnNodeInfo => {
                let info = NodeInfo {
                    num: self.identity.node_id,
                    user: Some(User::for_node(
                        self.identity.node_id,
                        self.long_name.clone(),
                        self.identity.mac,
                    )),
                };
                let record = encode_node_info(self.next_record_id(), &info)?;
                self.state = HandshakeState::SendCompleteId;
                record
            }
            HandshakeState::SendCompleteId => {
                let record = encode_config_complete(self.next_record_id(), self.nonce)?;
                self.state = HandshakeState::SendPackets;
                self.stats.handshakes_completed += 1;
                info!(nonce = self.nonce, pending = self.outbound.len(), "Handshake complete");
                record
            }
            HandshakeState::SendPackets => {
                let Some(packet) = self.outbound.front() else {
                    return Ok(Bytes::new());
                };
                let record = encode_from_radio_packet(self.record_id.wrapping_add(1), packet)?;
                self.outbound.pop_front();
                self.next_record_id();
                record
            }
        };
        trace!(state = %self.state, len = record.len(), "FromRadio read");
        Ok(record)
    }

    fn next_record_id(&mut self) -> u32 {
        self.record_id = self.record_id.wrapping_add(1);
        self.record_id
    }

    /// Queue a packet for the companion
    ///
    /// Returns the new counter value to notify when in steady state.
    /// Before the handshake completes the packet waits in the FIFO.
    /// Packets whose payload exceeds the Data limit are refused.
    pub fn queue_packet(&mut self, packet: MeshPacket) -> Option<u32> {
        if let Err(e) = check_payload(&packet) {
            warn!(id = packet.id, "Refusing packet for companion: {}", e);
            self.stats.packets_rejected += 1;
            return None;
        }
        if push_bounded(&mut self.outbound, packet, self.capacity) {
            warn!("FromRadio queue full, dropped oldest packet");
            self.stats.packets_dropped += 1;
        }
        self.stats.packets_queued += 1;
        self.is_ready().then(|| self.bump_counter())
    }

    /// Queue a private-port payload from `from` to the companion
    pub fn queue_payload(&mut self, from: u32, payload: Bytes) -> Option<u32> {
        let packet = MeshPacket::with_data(
            from,
            self.identity.node_id,
            self.take_packet_id(),
            DataPacket::private(payload),
        );
        self.queue_packet(packet)
    }

    /// Queue a chat text from `from` to the companion
    pub fn queue_text(&mut self, from: u32, text: &str) -> Option<u32> {
        let packet = MeshPacket::with_data(
            from,
            self.identity.node_id,
            self.take_packet_id(),
            DataPacket::text(text),
        );
        self.queue_packet(packet)
    }

    fn take_packet_id(&mut self) -> u32 {
        self.next_packet_id = self.next_packet_id.wrapping_add(1);
        self.next_packet_id
    }
}

/// Push, dropping the oldest entry when full; returns true if one was dropped
fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, capacity: usize) -> bool {
    let dropped = if queue.len() >= capacity {
        queue.pop_front();
        true
    } else {
        false
    };
    queue.push_back(item);
    dropped
}
