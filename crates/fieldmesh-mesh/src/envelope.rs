//! Mesh envelope and its radio frame encoding
//!
//! # Frame format
//!
//! Big-endian header followed by the payload:
//!
//! ```text
//! +--------+--------+--------+------+------+-----+-----+-----------+-------------+---------+
//! | source | dest   | seq    | type | prio | hop | ttl | timestamp | payload_len | payload |
//! | u32    | u32    | u32    | u8   | u8   | u8  | u8  | u32       | u16         | ...     |
//! +--------+--------+--------+------+------+-----+-----+-----------+-------------+---------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use fieldmesh_core::{Priority, BROADCAST_ADDR};
use std::fmt;

use crate::config::LORA_MAX_PAYLOAD;
use crate::error::{MeshError, Result};

/// Envelope header size in bytes
pub const ENVELOPE_HEADER_SIZE: usize = 22;

/// Largest payload that fits a single radio frame
pub const MAX_ENVELOPE_PAYLOAD: usize = LORA_MAX_PAYLOAD - ENVELOPE_HEADER_SIZE;

/// Mesh message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Incident report
    Incident,
    /// Periodic presence beacon
    Heartbeat,
    /// Positive acknowledgement
    Ack,
    /// Negative acknowledgement
    Nack,
    /// Route discovery request
    RouteRequest,
    /// Route discovery reply
    RouteReply,
    /// Fragment of a larger transfer
    DataChunk,
}

impl MessageType {
    /// Wire code
    pub fn code(self) -> u8 {
        match self {
            MessageType::Incident => 1,
            MessageType::Heartbeat => 2,
            MessageType::Ack => 3,
            MessageType::Nack => 4,
            MessageType::RouteRequest => 5,
            MessageType::RouteReply => 6,
            MessageType::DataChunk => 7,
        }
    }

    /// Parse a wire code
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            1 => Ok(MessageType::Incident),
            2 => Ok(MessageType::Heartbeat),
            3 => Ok(MessageType::Ack),
            4 => Ok(MessageType::Nack),
            5 => Ok(MessageType::RouteRequest),
            6 => Ok(MessageType::RouteReply),
            7 => Ok(MessageType::DataChunk),
            other => Err(MeshError::UnknownMessageType(other)),
        }
    }

    /// ACK and NACK are unicast replies
    pub fn is_acknowledgement(self) -> bool {
        matches!(self, MessageType::Ack | MessageType::Nack)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Incident => "INCIDENT",
            MessageType::Heartbeat => "HEARTBEAT",
            MessageType::Ack => "ACK",
            MessageType::Nack => "NACK",
            MessageType::RouteRequest => "ROUTE_REQUEST",
            MessageType::RouteReply => "ROUTE_REPLY",
            MessageType::DataChunk => "DATA_CHUNK",
        };
        f.write_str(name)
    }
}

/// A routed mesh message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshEnvelope {
    /// Originating node
    pub source: u32,
    /// Destination node or [`BROADCAST_ADDR`]
    pub destination: u32,
    /// Per-source sequence number
    pub sequence: u32,
    /// Message kind
    pub message_type: MessageType,
    /// Priority
    pub priority: Priority,
    /// Relays so far
    pub hop_count: u8,
    /// Lifetime in seconds from `timestamp`
    pub ttl: u8,
    /// Origination time, unix seconds
    pub timestamp: u32,
    /// Opaque payload
    pub payload: Bytes,
}

impl MeshEnvelope {
    /// Whether this envelope is addressed to everyone
    pub fn is_broadcast(&self) -> bool {
        self.destination == BROADCAST_ADDR
    }

    /// Dedup key
    pub fn key(&self) -> (u32, u32) {
        (self.source, self.sequence)
    }

    /// Copy for retransmission with one more hop
    pub fn relayed(&self) -> Self {
        Self {
            hop_count: self.hop_count.saturating_add(1),
            ..self.clone()
        }
    }

    /// Encode to a radio frame
    pub fn encode(&self) -> Result<Bytes> {
        if self.payload.len() > MAX_ENVELOPE_PAYLOAD {
            return Err(MeshError::PayloadTooLarge {
                size: self.payload.len(),
                max: MAX_ENVELOPE_PAYLOAD,
            });
        }

        let mut buf = BytesMut::with_capacity(ENVELOPE_HEADER_SIZE + self.payload.len());
        buf.put_u32(self.source);
        buf.put_u32(self.destination);
        buf.put_u32(self.sequence);
        buf.put_u8(self.message_type.code());
        buf.put_u8(self.priority.code());
        buf.put_u8(self.hop_count);
        buf.put_u8(self.ttl);
        buf.put_u32(self.timestamp);
        buf.put_u16(self.payload.len() as u16);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Decode a radio frame
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < ENVELOPE_HEADER_SIZE {
            return Err(MeshError::Malformed(format!(
                "frame too short: {} bytes",
                data.len()
            )));
        }

        let mut buf = data;
        let source = buf.get_u32();
        let destination = buf.get_u32();
        let sequence = buf.get_u32();
        let message_type = MessageType::from_code(buf.get_u8())?;
        let priority = Priority::from_code(buf.get_u8())?;
        let hop_count = buf.get_u8();
        let ttl = buf.get_u8();
        let timestamp = buf.get_u32();
        let payload_len = buf.get_u16() as usize;

        if buf.remaining() < payload_len {
            return Err(MeshError::Malformed(format!(
                "payload length {} exceeds remaining {}",
                payload_len,
                buf.remaining()
            )));
        }

        Ok(Self {
            source,
            destination,
            sequence,
            message_type,
            priority,
            hop_count,
            ttl,
            timestamp,
            payload: Bytes::copy_from_slice(&buf[..payload_len]),
        })
    }
}

impl fmt::Display for MeshEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} 0x{:08x}->0x{:08x} seq={} hop={} {}B",
            self.message_type,
            self.source,
            self.destination,
            self.sequence,
            self.hop_count,
            self.payload.len()
        )
    }
}
