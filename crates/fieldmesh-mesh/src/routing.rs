//! Routing table learned from overheard traffic
//!
//! Every processed packet tells us the originator can be reached through
//! whichever neighbour we heard it from. Entries are refreshed by fresher
//! observations and dropped after the entry TTL.

use std::collections::HashMap;
use tracing::{debug, trace};

/// A learned route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    /// Node this route reaches
    pub destination: u32,
    /// Neighbour to hand packets to
    pub next_hop: u32,
    /// Relays between us and the destination when last heard
    pub hop_count: u8,
    /// When the route was last observed, unix seconds
    pub last_seen: u32,
}

/// Destination-keyed route table
#[derive(Debug, Default)]
pub struct RoutingTable {
    routes: HashMap<u32, RouteEntry>,
}

impl RoutingTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observation; returns true if the table changed
    ///
    /// An observation at least as recent as the stored one replaces it.
    pub fn observe(&mut self, destination: u32, next_hop: u32, hop_count: u8, now: u32) -> bool {
        let candidate = RouteEntry {
            destination,
            next_hop,
            hop_count,
            last_seen: now,
        };

        match self.routes.get_mut(&destination) {
            Some(existing) if existing.last_seen > now => {
                trace!(destination, "Ignoring older route observation");
                false
            }
            Some(existing) => {
                let changed = *existing != candidate;
                if existing.next_hop != next_hop {
                    debug!(
                        destination = format_args!("0x{:08x}", destination),
                        old = format_args!("0x{:08x}", existing.next_hop),
                        new = format_args!("0x{:08x}", next_hop),
                        "Route next hop changed"
                    );
                }
                *existing = candidate;
                changed
            }
            None => {
                debug!(
                    destination = format_args!("0x{:08x}", destination),
                    next_hop = format_args!("0x{:08x}", next_hop),
                    hop_count,
                    "New route"
                );
                self.routes.insert(destination, candidate);
                true
            }
        }
    }

    /// Look up a live route
    pub fn get(&self, destination: u32, now: u32, ttl_secs: u32) -> Option<&RouteEntry> {
        self.routes
            .get(&destination)
            .filter(|entry| now.saturating_sub(entry.last_seen) <= ttl_secs)
    }

    /// Drop routes older than the TTL; returns how many were removed
    pub fn expire(&mut self, now: u32, ttl_secs: u32) -> usize {
        let before = self.routes.len();
        self.routes
            .retain(|_, entry| now.saturating_sub(entry.last_seen) <= ttl_secs);
        before - self.routes.len()
    }

    /// Snapshot of all entries, sorted by destination
    pub fn entries(&self) -> Vec<RouteEntry> {
        let mut entries: Vec<_> = self.routes.values().copied().collect();
        entries.sort_by_key(|e| e.destination);
        entries
    }

    /// Number of routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
