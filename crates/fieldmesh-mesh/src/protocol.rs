//! Flood-routing mesh protocol
//!
//! One `MeshProtocol` runs per radio node. It owns the node's sequence
//! counter, dedup cache, routing table and local delivery queue, and must
//! be driven from a single task.
//!
//! # Reception
//!
//! 1. Decode; malformed frames are dropped
//! 2. Drop if `(source, sequence)` was seen within the entry TTL
//! 3. Refresh the route to the source via the immediate sender
//! 4. Queue for local delivery if addressed to us or broadcast
//! 5. Independently decide whether to relay (see [`MeshProtocol::should_relay`])
//! 6. Acknowledge unicast deliveries
//!
//! Delivery is best effort. Sending returns `false` on failure and bumps an
//! error counter; retrying is the caller's business.

use bytes::Bytes;
use fieldmesh_core::{Priority, BROADCAST_ADDR};
use std::collections::VecDeque;
use tracing::{debug, info, trace, warn};

use crate::config::MeshConfig;
use crate::dedup::DedupCache;
use crate::envelope::{MeshEnvelope, MessageType};
use crate::radio::{Clock, Radio, ReceivedFrame};
use crate::routing::{RouteEntry, RoutingTable};
use crate::summary::IncidentSummary;

/// Protocol counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeshStats {
    /// Envelopes we originated successfully
    pub originated: u64,
    /// Envelopes we relayed
    pub relayed: u64,
    /// Envelopes queued for local delivery
    pub delivered: u64,
    /// Frames dropped as duplicates
    pub duplicates_dropped: u64,
    /// Frames processed but not eligible for relay
    pub relay_rejected: u64,
    /// Frames that failed to decode
    pub malformed: u64,
    /// ACKs synthesized
    pub acks_sent: u64,
    /// Transmit or encode failures
    pub send_errors: u64,
    /// Deliveries dropped because the queue was full
    pub delivery_overflows: u64,
}

/// What happened to one received frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Could not be decoded
    Malformed,
    /// Already seen
    Duplicate,
    /// Processed
    Accepted {
        /// Queued for local delivery
        delivered: bool,
        /// Retransmitted
        relayed: bool,
    },
}

/// Flood-routing engine for one node
pub struct MeshProtocol<R: Radio, C: Clock> {
    node_id: u32,
    radio: R,
    clock: C,
    config: MeshConfig,
    next_sequence: u32,
    dedup: DedupCache,
    routes: RoutingTable,
    inbox: VecDeque<MeshEnvelope>,
    stats: MeshStats,
}

impl<R: Radio, C: Clock> MeshProtocol<R, C> {
    /// Create a protocol instance
    pub fn new(node_id: u32, radio: R, clock: C, config: MeshConfig) -> Self {
        let dedup = DedupCache::new(config.dedup_capacity, config.entry_ttl_secs());
        Self {
            node_id,
            radio,
            clock,
            config,
            // Random start so a rebooted node is not mistaken for its own echo
            next_sequence: rand::random(),
            dedup,
            routes: RoutingTable::new(),
            inbox: VecDeque::new(),
            stats: MeshStats::default(),
        }
    }

    /// This node's address
    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    /// Protocol configuration
    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    fn take_sequence(&mut self) -> u32 {
        let seq = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        seq
    }

    // ===== Origination =====

    /// Originate an envelope; returns false on encode or radio failure
    pub fn send(
        &mut self,
        destination: u32,
        message_type: MessageType,
        priority: Priority,
        payload: Bytes,
    ) -> bool {
        let now = self.clock.now_secs();
        let envelope = MeshEnvelope {
            source: self.node_id,
            destination,
            sequence: self.take_sequence(),
            message_type,
            priority,
            hop_count: 0,
            ttl: self.config.default_ttl,
            timestamp: now,
            payload,
        };

        // Our own packet echoing back must not be processed as new
        self.dedup.mark_seen(envelope.key(), now);

        if self.transmit(&envelope) {
            self.stats.originated += 1;
            trace!("Originated {}", envelope);
            true
        } else {
            false
        }
    }

    /// Originate an incident summary; attachments are not carried here
    pub fn send_incident(
        &mut self,
        destination: u32,
        priority: Priority,
        summary: &IncidentSummary,
    ) -> bool {
        self.send(destination, MessageType::Incident, priority, summary.encode())
    }

    /// Broadcast an empty heartbeat
    pub fn send_heartbeat(&mut self) -> bool {
        debug!(node = format_args!("0x{:08x}", self.node_id), "Heartbeat");
        self.send(
            BROADCAST_ADDR,
            MessageType::Heartbeat,
            Priority::Low,
            Bytes::new(),
        )
    }

    fn transmit(&mut self, envelope: &MeshEnvelope) -> bool {
        let frame = match envelope.encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Cannot encode {}: {}", envelope, e);
                self.stats.send_errors += 1;
                return false;
            }
        };
        match self.radio.transmit(&frame) {
            Ok(()) => true,
            Err(e) => {
                warn!("Radio transmit failed for {}: {}", envelope, e);
                self.stats.send_errors += 1;
                false
            }
        }
    }

    // ===== Reception =====

    /// Drain every frame the radio has ready; returns how many were handled
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Some(frame) = self.radio.try_receive() {
            self.handle_frame(frame);
            handled += 1;
        }
        handled
    }

    /// Process one received frame
    pub fn handle_frame(&mut self, frame: ReceivedFrame) -> FrameOutcome {
        let envelope = match MeshEnvelope::decode(&frame.data) {
            Ok(env) => env,
            Err(e) => {
                debug!("Dropping undecodable frame ({} bytes): {}", frame.data.len(), e);
                self.stats.malformed += 1;
                return FrameOutcome::Malformed;
            }
        };

        let now = self.clock.now_secs();
        if self.dedup.check_and_insert(envelope.key(), now) {
            self.stats.duplicates_dropped += 1;
            return FrameOutcome::Duplicate;
        }

        trace!(rssi = ?frame.rssi, "Received {}", envelope);

        let next_hop = frame.sender.unwrap_or(envelope.source);
        self.routes
            .observe(envelope.source, next_hop, envelope.hop_count, now);
        if next_hop != envelope.source {
            self.routes.observe(next_hop, next_hop, 0, now);
        }

        let for_us = envelope.destination == self.node_id;
        let delivered = for_us || envelope.is_broadcast();

        let relayed = if self.should_relay(&envelope, now) {
            let relay = envelope.relayed();
            if self.transmit(&relay) {
                self.stats.relayed += 1;
                trace!("Relayed {}", relay);
                true
            } else {
                false
            }
        } else {
            self.stats.relay_rejected += 1;
            false
        };

        if for_us && !envelope.message_type.is_acknowledgement() {
            self.send_ack(&envelope);
        }

        if delivered {
            self.deliver(envelope);
        }

        FrameOutcome::Accepted { delivered, relayed }
    }

    /// Relay eligibility
    ///
    /// Not relayed: hop count at the limit, older than its TTL, ACK/NACK,
    /// or addressed to a node other than us. Broadcasts and packets
    /// addressed to this node are relayed, so a unicast to a node outside
    /// the sender's radio range is never carried there.
    pub fn should_relay(&self, envelope: &MeshEnvelope, now: u32) -> bool {
        if envelope.hop_count >= self.config.max_hops {
            trace!("Hop limit reached: {}", envelope);
            return false;
        }
        if now.saturating_sub(envelope.timestamp) > envelope.ttl as u32 {
            trace!("TTL expired: {}", envelope);
            return false;
        }
        if envelope.message_type.is_acknowledgement() {
            return false;
        }
        envelope.is_broadcast() || envelope.destination == self.node_id
    }

    fn send_ack(&mut self, envelope: &MeshEnvelope) {
        let payload = Bytes::copy_from_slice(&envelope.sequence.to_be_bytes());
        if self.send(envelope.source, MessageType::Ack, Priority::High, payload) {
            self.stats.acks_sent += 1;
            debug!(
                to = format_args!("0x{:08x}", envelope.source),
                seq = envelope.sequence,
                "Acknowledged"
            );
        }
    }

    fn deliver(&mut self, envelope: MeshEnvelope) {
        if self.inbox.len() >= self.config.delivery_queue_size.max(1) {
            if let Some(dropped) = self.inbox.pop_front() {
                warn!("Delivery queue full, dropping oldest {}", dropped);
                self.stats.delivery_overflows += 1;
            }
        }
        self.inbox.push_back(envelope);
        self.stats.delivered += 1;
    }

    /// Whether delivered envelopes are waiting
    pub fn has_data(&self) -> bool {
        !self.inbox.is_empty()
    }

    /// Take the oldest delivered envelope
    pub fn take(&mut self) -> Option<MeshEnvelope> {
        self.inbox.pop_front()
    }

    // ===== Maintenance =====

    /// Expire stale routes and dedup entries; returns how many were removed
    pub fn maintenance(&mut self) -> usize {
        let now = self.clock.now_secs();
        let ttl = self.config.entry_ttl_secs();
        let routes = self.routes.expire(now, ttl);
        let dedup = self.dedup.expire(now);
        if routes + dedup > 0 {
            info!(routes, dedup, "Expired stale mesh state");
        }
        routes + dedup
    }

    /// Live routes
    pub fn routes(&self) -> Vec<RouteEntry> {
        let now = self.clock.now_secs();
        let ttl = self.config.entry_ttl_secs();
        self.routes
            .entries()
            .into_iter()
            .filter(|e| now.saturating_sub(e.last_seen) <= ttl)
            .collect()
    }

    /// Route to a destination, if one is live
    pub fn route_to(&self, destination: u32) -> Option<RouteEntry> {
        self.routes
            .get(destination, self.clock.now_secs(), self.config.entry_ttl_secs())
            .copied()
    }

    /// Dedup entries currently held
    pub fn dedup_len(&self) -> usize {
        self.dedup.len()
    }

    /// Counter snapshot
    pub fn stats(&self) -> MeshStats {
        self.stats.clone()
    }
}

/// Sequence number carried by an ACK payload
pub fn acked_sequence(envelope: &MeshEnvelope) -> Option<u32> {
    if envelope.message_type != MessageType::Ack {
        return None;
    }
    let bytes: [u8; 4] = envelope.payload.get(..4)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}
