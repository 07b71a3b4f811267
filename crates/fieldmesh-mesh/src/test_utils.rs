//! Simulated radio medium for multi-node tests
//!
//! A [`SimMedium`] is a shared broadcast domain: every [`SimRadio`] created
//! from it hears the frames transmitted by the radios it is linked to.
//! Links are symmetric. Frames are tagged with the transmitter's node id as
//! the link-layer sender.
//!
//! ```rust
//! use fieldmesh_mesh::radio::Radio;
//! use fieldmesh_mesh::test_utils::SimMedium;
//!
//! let medium = SimMedium::new();
//! let mut a = medium.radio(1);
//! let mut b = medium.radio(2);
//! medium.link(1, 2);
//!
//! a.transmit(b"hello").unwrap();
//! let frame = b.try_receive().unwrap();
//! assert_eq!(frame.sender, Some(1));
//! ```

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::error::{MeshError, Result};
use crate::radio::{Radio, ReceivedFrame};

/// Signal strength stamped on simulated frames
pub const SIM_RSSI: i16 = -60;

#[derive(Default)]
struct MediumState {
    links: HashMap<u32, HashSet<u32>>,
    inboxes: HashMap<u32, VecDeque<ReceivedFrame>>,
    transmissions: HashMap<u32, Vec<Bytes>>,
    failing: HashSet<u32>,
}

/// Shared simulated broadcast medium
#[derive(Clone, Default)]
pub struct SimMedium {
    state: Arc<Mutex<MediumState>>,
}

impl SimMedium {
    /// Create an empty medium
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a radio for a node
    pub fn radio(&self, node_id: u32) -> SimRadio {
        self.state.lock().inboxes.entry(node_id).or_default();
        SimRadio {
            node_id,
            medium: self.clone(),
        }
    }

    /// Put two nodes in range of each other
    pub fn link(&self, a: u32, b: u32) {
        let mut state = self.state.lock();
        state.links.entry(a).or_default().insert(b);
        state.links.entry(b).or_default().insert(a);
    }

    /// Take two nodes out of range
    pub fn unlink(&self, a: u32, b: u32) {
        let mut state = self.state.lock();
        if let Some(peers) = state.links.get_mut(&a) {
            peers.remove(&b);
        }
        if let Some(peers) = state.links.get_mut(&b) {
            peers.remove(&a);
        }
    }

    /// Make a node's transmissions fail
    pub fn set_failing(&self, node_id: u32, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing.insert(node_id);
        } else {
            state.failing.remove(&node_id);
        }
    }

    /// Frames a node has put on the air
    pub fn transmissions(&self, node_id: u32) -> Vec<Bytes> {
        self.state
            .lock()
            .transmissions
            .get(&node_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Total frames transmitted by all nodes
    pub fn total_transmissions(&self) -> usize {
        self.state.lock().transmissions.values().map(Vec::len).sum()
    }

    /// Whether any frame is still waiting to be received
    pub fn in_flight(&self) -> bool {
        self.state.lock().inboxes.values().any(|q| !q.is_empty())
    }

    /// Inject a frame directly into a node's inbox
    pub fn inject(&self, node_id: u32, frame: ReceivedFrame) {
        self.state
            .lock()
            .inboxes
            .entry(node_id)
            .or_default()
            .push_back(frame);
    }
}

/// One node's view of a [`SimMedium`]
pub struct SimRadio {
    node_id: u32,
    medium: SimMedium,
}

impl SimRadio {
    /// Node this radio belongs to
    pub fn node_id(&self) -> u32 {
        self.node_id
    }
}

impl Radio for SimRadio {
    fn transmit(&mut self, frame: &[u8]) -> Result<()> {
        let mut state = self.medium.state.lock();
        if state.failing.contains(&self.node_id) {
            return Err(MeshError::Radio("simulated transmit failure".into()));
        }

        let data = Bytes::copy_from_slice(frame);
        state
            .transmissions
            .entry(self.node_id)
            .or_default()
            .push(data.clone());

        let peers: Vec<u32> = state
            .links
            .get(&self.node_id)
            .map(|p| p.iter().copied().collect())
            .unwrap_or_default();
        for peer in peers {
            state
                .inboxes
                .entry(peer)
                .or_default()
                .push_back(ReceivedFrame {
                    data: data.clone(),
                    sender: Some(self.node_id),
                    rssi: Some(SIM_RSSI),
                });
        }
        Ok(())
    }

    fn try_receive(&mut self) -> Option<ReceivedFrame> {
        self.medium
            .state
            .lock()
            .inboxes
            .get_mut(&self.node_id)
            .and_then(VecDeque::pop_front)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_linked_nodes_hear() {
        let medium = SimMedium::new();
        let mut a = medium.radio(1);
        let mut b = medium.radio(2);
        let mut c = medium.radio(3);
        medium.link(1, 2);

        a.transmit(b"ping").unwrap();
        assert!(b.try_receive().is_some());
        assert!(c.try_receive().is_none());
        assert_eq!(medium.transmissions(1).len(), 1);
    }

    #[test]
    fn test_failing_radio() {
        let medium = SimMedium::new();
        let mut a = medium.radio(1);
        medium.set_failing(1, true);
        assert!(a.transmit(b"x").is_err());
        assert_eq!(medium.total_transmissions(), 0);
    }

    #[test]
    fn test_unlink() {
        let medium = SimMedium::new();
        let mut a = medium.radio(1);
        let mut b = medium.radio(2);
        medium.link(1, 2);
        medium.unlink(2, 1);
        a.transmit(b"x").unwrap();
        assert!(b.try_receive().is_none());
        assert!(!medium.in_flight());
    }
}
