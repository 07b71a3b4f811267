//! Meshtastic message subset
//!
//! Typed views of the handful of `ToRadio`/`FromRadio` messages the BLE
//! handshake and data path use, with builders and parsers on top of
//! [`crate::proto`]. Field numbers follow the public Meshtastic schema.

use bytes::Bytes;
use std::fmt;

use crate::error::{MeshtasticError, Result};
use crate::proto::{
    extract_fixed32, extract_length_delimited, extract_varint, fields, is_well_formed,
    FieldValue, ProtoWriter,
};

/// Largest encoded ToRadio/FromRadio we produce
pub const MAX_TO_FROM_RADIO_SIZE: usize = 512;

/// Largest `Data.payload` a Meshtastic radio carries
pub const MAX_DATA_PAYLOAD: usize = 233;

/// Hop limit stamped on packets we originate
pub const DEFAULT_HOP_LIMIT: u32 = 3;

/// Oldest companion app version we claim to support
pub const MIN_APP_VERSION: u32 = 30200;

/// `HardwareModel.PRIVATE_HW`
pub const HW_MODEL_PRIVATE: u32 = 255;

mod to_radio {
    pub const PACKET: u32 = 1;
    pub const WANT_CONFIG_ID: u32 = 3;
    pub const DISCONNECT: u32 = 4;
}

mod from_radio {
    pub const ID: u32 = 1;
    pub const PACKET: u32 = 2;
    pub const MY_INFO: u32 = 3;
    pub const NODE_INFO: u32 = 4;
    pub const CONFIG_COMPLETE_ID: u32 = 7;
}

mod mesh_packet {
    pub const FROM: u32 = 1;
    pub const TO: u32 = 2;
    pub const CHANNEL: u32 = 3;
    pub const DECODED: u32 = 4;
    pub const ID: u32 = 6;
    pub const RX_TIME: u32 = 7;
    pub const HOP_LIMIT: u32 = 9;
    pub const WANT_ACK: u32 = 10;
}

mod data {
    pub const PORTNUM: u32 = 1;
    pub const PAYLOAD: u32 = 2;
}

mod my_node_info {
    pub const MY_NODE_NUM: u32 = 1;
    pub const MIN_APP_VERSION: u32 = 11;
}

mod node_info {
    pub const NUM: u32 = 1;
    pub const USER: u32 = 2;
}

mod user {
    pub const ID: u32 = 1;
    pub const LONG_NAME: u32 = 2;
    pub const SHORT_NAME: u32 = 3;
    pub const MACADDR: u32 = 4;
    pub const HW_MODEL: u32 = 5;
}

/// Meshtastic application port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortNum {
    /// Plain chat text
    TextMessage,
    /// Private application payload, this system's port
    Private,
    /// Anything else
    Other(u32),
}

impl PortNum {
    /// Numeric port
    pub fn as_u32(self) -> u32 {
        match self {
            PortNum::TextMessage => 1,
            PortNum::Private => 256,
            PortNum::Other(n) => n,
        }
    }

    /// Port from its number
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => PortNum::TextMessage,
            256 => PortNum::Private,
            n => PortNum::Other(n),
        }
    }
}

impl fmt::Display for PortNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortNum::TextMessage => write!(f, "TEXT_MESSAGE_APP"),
            PortNum::Private => write!(f, "PRIVATE_APP"),
            PortNum::Other(n) => write!(f, "PORT_{}", n),
        }
    }
}

/// `Data`: the typed record inside a packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    /// Port discriminator
    pub portnum: PortNum,
    /// Opaque payload
    pub payload: Bytes,
}

impl DataPacket {
    /// Text on the chat port
    pub fn text(text: &str) -> Self {
        Self {
            portnum: PortNum::TextMessage,
            payload: Bytes::copy_from_slice(text.as_bytes()),
        }
    }

    /// Payload on the private port
    pub fn private(payload: impl Into<Bytes>) -> Self {
        Self {
            portnum: PortNum::Private,
            payload: payload.into(),
        }
    }

    /// Payload as UTF-8, if it is
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    fn write(&self) -> ProtoWriter {
        let mut w = ProtoWriter::new(MAX_TO_FROM_RADIO_SIZE);
        w.write_varint(data::PORTNUM, self.portnum.as_u32() as u64)
            .write_bytes(data::PAYLOAD, &self.payload);
        w
    }

    fn parse(buf: &[u8]) -> Option<Self> {
        let portnum = u32::try_from(extract_varint(buf, data::PORTNUM)?).ok()?;
        let payload = extract_length_delimited(buf, data::PAYLOAD).unwrap_or_default();
        Some(Self {
            portnum: PortNum::from_u32(portnum),
            payload: Bytes::copy_from_slice(payload),
        })
    }
}

/// `MeshPacket`: an addressed packet
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MeshPacket {
    /// Sender node number
    pub from: u32,
    /// Destination node number
    pub to: u32,
    /// Channel index
    pub channel: u32,
    /// Packet id, unique per sender
    pub id: u32,
    /// Receive time, unix seconds
    pub rx_time: u32,
    /// Remaining hops
    pub hop_limit: u32,
    /// Ask for an acknowledgement
    pub want_ack: bool,
    /// Decoded payload
    pub decoded: Option<DataPacket>,
}

impl MeshPacket {
    /// Packet carrying a data record
    pub fn with_data(from: u32, to: u32, id: u32, decoded: DataPacket) -> Self {
        Self {
            from,
            to,
            id,
            hop_limit: DEFAULT_HOP_LIMIT,
            decoded: Some(decoded),
            ..Default::default()
        }
    }

    /// Port of the decoded record
    pub fn portnum(&self) -> Option<PortNum> {
        self.decoded.as_ref().map(|d| d.portnum)
    }

    fn write(&self) -> ProtoWriter {
        let mut w = ProtoWriter::new(MAX_TO_FROM_RADIO_SIZE);
        w.write_fixed32(mesh_packet::FROM, self.from)
            .write_fixed32(mesh_packet::TO, self.to);
        if self.channel != 0 {
            w.write_varint(mesh_packet::CHANNEL, self.channel as u64);
        }
        if let Some(decoded) = &self.decoded {
            w.write_message(mesh_packet::DECODED, &decoded.write());
        }
        w.write_fixed32(mesh_packet::ID, self.id);
        if self.rx_time != 0 {
            w.write_fixed32(mesh_packet::RX_TIME, self.rx_time);
        }
        w.write_varint(mesh_packet::HOP_LIMIT, self.hop_limit as u64);
        if self.want_ack {
            w.write_bool(mesh_packet::WANT_ACK, true);
        }
        w
    }

    fn parse(buf: &[u8]) -> Option<Self> {
        if !is_well_formed(buf) {
            return None;
        }
        Some(Self {
            from: extract_fixed32(buf, mesh_packet::FROM).unwrap_or(0),
            to: extract_fixed32(buf, mesh_packet::TO).unwrap_or(0),
            channel: extract_varint(buf, mesh_packet::CHANNEL).unwrap_or(0) as u32,
            id: extract_fixed32(buf, mesh_packet::ID).unwrap_or(0),
            rx_time: extract_fixed32(buf, mesh_packet::RX_TIME).unwrap_or(0),
            hop_limit: extract_varint(buf, mesh_packet::HOP_LIMIT).unwrap_or(0) as u32,
            want_ack: extract_varint(buf, mesh_packet::WANT_ACK).unwrap_or(0) != 0,
            decoded: extract_length_delimited(buf, mesh_packet::DECODED).and_then(DataPacket::parse),
        })
    }
}

/// `MyNodeInfo`: first handshake record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MyNodeInfo {
    /// Our node number
    pub my_node_num: u32,
    /// Oldest app version supported
    pub min_app_version: u32,
}

/// `User`: node owner description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// `!%08x` form of the node number
    pub id: String,
    /// Display name
    pub long_name: String,
    /// Four-character badge
    pub short_name: String,
    /// Hardware address
    pub macaddr: [u8; 6],
    /// Hardware model code
    pub hw_model: u32,
}

impl User {
    /// Describe a fieldmesh node
    pub fn for_node(node_num: u32, long_name: impl Into<String>, macaddr: [u8; 6]) -> Self {
        Self {
            id: format!("!{:08x}", node_num),
            long_name: long_name.into(),
            short_name: format!("{:04x}", node_num & 0xFFFF),
            macaddr,
            hw_model: HW_MODEL_PRIVATE,
        }
    }
}

/// `NodeInfo`: second handshake record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// Node number
    pub num: u32,
    /// Owner
    pub user: Option<User>,
}

/// Payload of a `FromRadio`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FromRadioVariant {
    /// A received packet
    Packet(MeshPacket),
    /// Device identity
    MyInfo(MyNodeInfo),
    /// Device descriptor
    NodeInfo(NodeInfo),
    /// End of config, echoing the client nonce
    ConfigCompleteId(u32),
}

/// `FromRadio`: device to companion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromRadio {
    /// Record counter
    pub id: u32,
    /// Record body
    pub variant: FromRadioVariant,
}

/// `ToRadio`: companion to device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToRadio {
    /// Send a packet
    Packet(MeshPacket),
    /// Start the config handshake with a nonce
    WantConfigId(u32),
    /// Companion is going away
    Disconnect,
}

// ===== Builders =====

fn from_radio(id: u32) -> ProtoWriter {
    let mut w = ProtoWriter::new(MAX_TO_FROM_RADIO_SIZE);
    w.write_varint(from_radio::ID, id as u64);
    w
}

pub(crate) fn check_payload(packet: &MeshPacket) -> Result<()> {
    match &packet.decoded {
        Some(d) if d.payload.len() > MAX_DATA_PAYLOAD => Err(MeshtasticError::MessageTooLarge {
            size: d.payload.len(),
            max: MAX_DATA_PAYLOAD,
        }),
        _ => Ok(()),
    }
}

/// `ToRadio { want_config_id }`
pub fn encode_want_config(nonce: u32) -> Result<Bytes> {
    let mut w = ProtoWriter::new(MAX_TO_FROM_RADIO_SIZE);
    w.write_varint(to_radio::WANT_CONFIG_ID, nonce as u64);
    w.finish()
}

/// `ToRadio { packet }`
pub fn encode_to_radio_packet(packet: &MeshPacket) -> Result<Bytes> {
    check_payload(packet)?;
    let mut w = ProtoWriter::new(MAX_TO_FROM_RADIO_SIZE);
    w.write_message(to_radio::PACKET, &packet.write());
    w.finish()
}

/// `ToRadio { disconnect: true }`
pub fn encode_disconnect() -> Result<Bytes> {
    let mut w = ProtoWriter::new(MAX_TO_FROM_RADIO_SIZE);
    w.write_bool(to_radio::DISCONNECT, true);
    w.finish()
}

/// `FromRadio { id, my_info }`
pub fn encode_my_info(id: u32, info: &MyNodeInfo) -> Result<Bytes> {
    let mut inner = ProtoWriter::new(MAX_TO_FROM_RADIO_SIZE);
    inner
        .write_varint(my_node_info::MY_NODE_NUM, info.my_node_num as u64)
        .write_varint(my_node_info::MIN_APP_VERSION, info.min_app_version as u64);
    let mut w = from_radio(id);
    w.write_message(from_radio::MY_INFO, &inner);
    w.finish()
}

/// `FromRadio { id, node_info }`
pub fn encode_node_info(id: u32, info: &NodeInfo) -> Result<Bytes> {
    let mut inner = ProtoWriter::new(MAX_TO_FROM_RADIO_SIZE);
    inner.write_varint(node_info::NUM, info.num as u64);
    if let Some(u) = &info.user {
        let mut uw = ProtoWriter::new(MAX_TO_FROM_RADIO_SIZE);
        uw.write_string(user::ID, &u.id)
            .write_string(user::LONG_NAME, &u.long_name)
            .write_string(user::SHORT_NAME, &u.short_name)
            .write_bytes(user::MACADDR, &u.macaddr)
            .write_varint(user::HW_MODEL, u.hw_model as u64);
        inner.write_message(node_info::USER, &uw);
    }
    let mut w = from_radio(id);
    w.write_message(from_radio::NODE_INFO, &inner);
    w.finish()
}

/// `FromRadio { id, config_complete_id }`
pub fn encode_config_complete(id: u32, nonce: u32) -> Result<Bytes> {
    let mut w = from_radio(id);
    w.write_varint(from_radio::CONFIG_COMPLETE_ID, nonce as u64);
    w.finish()
}

/// `FromRadio { id, packet }`
pub fn encode_from_radio_packet(id: u32, packet: &MeshPacket) -> Result<Bytes> {
    check_payload(packet)?;
    let mut w = from_radio(id);
    w.write_message(from_radio::PACKET, &packet.write());
    w.finish()
}

// ===== Parsers =====

fn parse_user(buf: &[u8]) -> Option<User> {
    let text = |field| {
        extract_length_delimited(buf, field)
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default()
    };
    let mut macaddr = [0u8; 6];
    if let Some(mac) = extract_length_delimited(buf, user::MACADDR) {
        let n = mac.len().min(6);
        macaddr[..n].copy_from_slice(&mac[..n]);
    }
    Some(User {
        id: text(user::ID),
        long_name: text(user::LONG_NAME),
        short_name: text(user::SHORT_NAME),
        macaddr,
        hw_model: extract_varint(buf, user::HW_MODEL).unwrap_or(0) as u32,
    })
}

/// Parse a `FromRadio`; `None` if malformed or of an unsupported variant
pub fn parse_from_radio(buf: &[u8]) -> Option<FromRadio> {
    if buf.is_empty() || !is_well_formed(buf) {
        return None;
    }
    let id = extract_varint(buf, from_radio::ID).unwrap_or(0) as u32;

    let variant = fields(buf).find_map(|f| match (f.number, f.value) {
        (from_radio::PACKET, FieldValue::LengthDelimited(b)) => {
            MeshPacket::parse(b).map(FromRadioVariant::Packet)
        }
        (from_radio::MY_INFO, FieldValue::LengthDelimited(b)) => {
            Some(FromRadioVariant::MyInfo(MyNodeInfo {
                my_node_num: extract_varint(b, my_node_info::MY_NODE_NUM).unwrap_or(0) as u32,
                min_app_version: extract_varint(b, my_node_info::MIN_APP_VERSION).unwrap_or(0)
                    as u32,
            }))
        }
        (from_radio::NODE_INFO, FieldValue::LengthDelimited(b)) => {
            Some(FromRadioVariant::NodeInfo(NodeInfo {
                num: extract_varint(b, node_info::NUM).unwrap_or(0) as u32,
                user: extract_length_delimited(b, node_info::USER).and_then(parse_user),
            }))
        }
        (from_radio::CONFIG_COMPLETE_ID, FieldValue::Varint(v)) => {
            Some(FromRadioVariant::ConfigCompleteId(v as u32))
        }
        _ => None,
    })?;

    Some(FromRadio { id, variant })
}

/// Parse a `ToRadio`; `None` if malformed or of an unsupported variant
pub fn parse_to_radio(buf: &[u8]) -> Option<ToRadio> {
    if buf.is_empty() || !is_well_formed(buf) {
        return None;
    }
    fields(buf).find_map(|f| match (f.number, f.value) {
        (to_radio::PACKET, FieldValue::LengthDelimited(b)) => {
            MeshPacket::parse(b).map(ToRadio::Packet)
        }
        (to_radio::WANT_CONFIG_ID, FieldValue::Varint(v)) => Some(ToRadio::WantConfigId(v as u32)),
        (to_radio::DISCONNECT, FieldValue::Varint(v)) if v != 0 => Some(ToRadio::Disconnect),
        _ => None,
    })
}
