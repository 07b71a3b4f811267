//! TestCluster - several protocol instances on one simulated medium
//!
//! Nodes share a [`SimMedium`] and a [`ManualClock`]. The cluster is driven
//! synchronously: `pump` polls every node round-robin until no frame is
//! left in flight, so tests see the settled state of the flood.

use fieldmesh_mesh::test_utils::{SimMedium, SimRadio};
use fieldmesh_mesh::{ManualClock, MeshConfig, MeshEnvelope, MeshProtocol};

/// Start time for every cluster clock
pub const START: u32 = 1_700_000_000;

/// Upper bound on pump rounds before declaring a routing loop
const MAX_ROUNDS: usize = 1000;

pub struct TestNode {
    pub id: u32,
    pub protocol: MeshProtocol<SimRadio, ManualClock>,
}

pub struct TestCluster {
    pub medium: SimMedium,
    pub clock: ManualClock,
    pub nodes: Vec<TestNode>,
}

impl TestCluster {
    /// One node per id with default config and no links
    pub fn new(ids: &[u32]) -> Self {
        Self::with_config(ids, MeshConfig::default())
    }

    pub fn with_config(ids: &[u32], config: MeshConfig) -> Self {
        let medium = SimMedium::new();
        let clock = ManualClock::new(START);
        let nodes = ids
            .iter()
            .map(|&id| TestNode {
                id,
                protocol: MeshProtocol::new(id, medium.radio(id), clock.clone(), config.clone()),
            })
            .collect();
        Self {
            medium,
            clock,
            nodes,
        }
    }

    /// Link consecutive ids into a chain
    pub fn chain(ids: &[u32]) -> Self {
        let cluster = Self::new(ids);
        for pair in ids.windows(2) {
            cluster.medium.link(pair[0], pair[1]);
        }
        cluster
    }

    pub fn node(&mut self, id: u32) -> &mut MeshProtocol<SimRadio, ManualClock> {
        &mut self
            .nodes
            .iter_mut()
            .find(|n| n.id == id)
            .expect("unknown node id")
            .protocol
    }

    /// Poll every node until the medium is quiet; returns rounds taken
    pub fn pump(&mut self) -> usize {
        for round in 1..=MAX_ROUNDS {
            for node in &mut self.nodes {
                node.protocol.poll();
            }
            if !self.medium.in_flight() {
                return round;
            }
        }
        panic!("medium did not settle after {} rounds", MAX_ROUNDS);
    }

    /// Drain a node's delivery queue
    pub fn delivered(&mut self, id: u32) -> Vec<MeshEnvelope> {
        let node = self.node(id);
        std::iter::from_fn(|| node.take()).collect()
    }
}
