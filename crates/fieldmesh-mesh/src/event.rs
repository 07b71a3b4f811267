//! Mesh events
//!
//! Events emitted by the mesh service for consumption by the bridge and
//! any other part of the application.

use chrono::{DateTime, Utc};

use crate::envelope::{MeshEnvelope, MessageType};
use crate::protocol::acked_sequence;

/// Events emitted by the mesh service
#[derive(Debug, Clone)]
pub enum MeshEvent {
    /// Service started
    Started {
        /// Our node address
        node_id: u32,
    },

    /// Service stopped
    Stopped,

    /// An envelope was delivered to this node
    Delivered {
        /// The envelope as received
        envelope: MeshEnvelope,
        /// When it was taken off the delivery queue
        received_at: DateTime<Utc>,
    },

    /// A node acknowledged one of our packets
    Acknowledged {
        /// Acknowledging node
        from: u32,
        /// Sequence number it acknowledged
        sequence: u32,
    },
}

impl MeshEvent {
    /// Build the event for a delivered envelope
    ///
    /// ACKs addressed to us surface as [`MeshEvent::Acknowledged`].
    pub fn from_delivery(envelope: MeshEnvelope) -> Self {
        if envelope.message_type == MessageType::Ack {
            if let Some(sequence) = acked_sequence(&envelope) {
                return MeshEvent::Acknowledged {
                    from: envelope.source,
                    sequence,
                };
            }
        }
        MeshEvent::Delivered {
            envelope,
            received_at: Utc::now(),
        }
    }

    /// Check if this is a delivery of the given type
    pub fn is_delivery_of(&self, message_type: MessageType) -> bool {
        matches!(self, MeshEvent::Delivered { envelope, .. } if envelope.message_type == message_type)
    }

    /// The delivered envelope, if any
    pub fn envelope(&self) -> Option<&MeshEnvelope> {
        match self {
            MeshEvent::Delivered { envelope, .. } => Some(envelope),
            _ => None,
        }
    }
}
