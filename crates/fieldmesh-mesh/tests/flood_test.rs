//! Flood Routing Integration Tests
//!
//! Multi-node scenarios on a simulated medium:
//! - Exactly-once delivery in a mesh with redundant paths
//! - Hop-limited propagation along a chain
//! - Unicast acknowledgement
//! - TTL expiry and route learning

mod helpers;

use bytes::Bytes;
use fieldmesh_core::{Priority, BROADCAST_ADDR};
use fieldmesh_mesh::{
    acked_sequence, IncidentSummary, MeshEnvelope, MessageType, MAX_HOPS,
};
use helpers::TestCluster;

const A: u32 = 0x1001;
const B: u32 = 0x2002;
const C: u32 = 0x3003;

fn triangle() -> TestCluster {
    let cluster = TestCluster::new(&[A, B, C]);
    cluster.medium.link(A, B);
    cluster.medium.link(A, C);
    cluster.medium.link(B, C);
    cluster
}

// ============================================================================
// Delivery
// ============================================================================

/// Setup:
/// - A in range of B and C, B in range of C
/// - A broadcasts one incident
/// - Every other node processes it exactly once
#[test]
fn test_broadcast_delivered_exactly_once() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("fieldmesh_mesh=debug")
        .try_init();

    let mut cluster = triangle();
    let summary = IncidentSummary::new(52.52, 13.405, 34.5, "Drone spotted");
    assert!(cluster
        .node(A)
        .send_incident(BROADCAST_ADDR, Priority::High, &summary));

    cluster.pump();

    let at_b = cluster.delivered(B);
    let at_c = cluster.delivered(C);
    assert_eq!(at_b.len(), 1);
    assert_eq!(at_c.len(), 1);
    assert_eq!(at_c[0].source, A);
    assert_eq!(IncidentSummary::decode(&at_c[0].payload).unwrap(), summary);

    // Originator does not deliver its own echo
    assert!(cluster.delivered(A).is_empty());
    assert!(cluster.node(A).stats().duplicates_dropped >= 1);

    // B and C each relay once, and never again
    assert_eq!(cluster.medium.transmissions(B).len(), 1);
    assert_eq!(cluster.medium.transmissions(C).len(), 1);
    assert_eq!(cluster.medium.total_transmissions(), 3);
}

#[test]
fn test_several_originators_interleaved() {
    let mut cluster = triangle();
    cluster.node(A).send_heartbeat();
    cluster.node(B).send_heartbeat();
    cluster.node(C).send_heartbeat();
    cluster.pump();

    for id in [A, B, C] {
        let delivered = cluster.delivered(id);
        assert_eq!(delivered.len(), 2, "node 0x{:x}", id);
        assert!(delivered.iter().all(|e| e.source != id));
        assert!(delivered
            .iter()
            .all(|e| e.message_type == MessageType::Heartbeat));
    }
}

// ============================================================================
// Hop and TTL bounds
// ============================================================================

/// A chain of 8 nodes: the origin's frame reaches the node 6 relays away,
/// which does not relay further.
#[test]
fn test_hop_limit_on_chain() {
    let ids: Vec<u32> = (1..=8).collect();
    let mut cluster = TestCluster::chain(&ids);

    cluster.node(1).send(
        BROADCAST_ADDR,
        MessageType::Incident,
        Priority::Critical,
        Bytes::from_static(b"flood"),
    );
    cluster.pump();

    for id in 2..=7 {
        assert_eq!(cluster.delivered(id).len(), 1, "node {}", id);
    }
    assert!(cluster.delivered(8).is_empty());

    let max_hop = ids
        .iter()
        .flat_map(|&id| cluster.medium.transmissions(id))
        .map(|f| MeshEnvelope::decode(&f).unwrap().hop_count)
        .max()
        .unwrap();
    assert_eq!(max_hop, MAX_HOPS);
    assert!(cluster.medium.transmissions(7).is_empty());
}

#[test]
fn test_expired_frame_not_relayed() {
    let mut cluster = TestCluster::chain(&[A, B, C]);
    cluster.node(A).send_heartbeat();
    cluster.clock.advance(61);
    cluster.pump();

    assert_eq!(cluster.delivered(B).len(), 1);
    assert!(cluster.delivered(C).is_empty());
    assert!(cluster.medium.transmissions(B).is_empty());
}

// ============================================================================
// Unicast
// ============================================================================

#[test]
fn test_unicast_acknowledged() {
    let mut cluster = TestCluster::chain(&[A, B]);
    assert!(cluster.node(A).send(
        B,
        MessageType::Incident,
        Priority::High,
        Bytes::from_static(b"to b"),
    ));
    let sent = MeshEnvelope::decode(&cluster.medium.transmissions(A)[0]).unwrap();
    cluster.pump();

    let at_b = cluster.delivered(B);
    assert_eq!(at_b.len(), 1);
    assert_eq!(&at_b[0].payload[..], b"to b");

    let at_a = cluster.delivered(A);
    assert_eq!(at_a.len(), 1);
    assert_eq!(at_a[0].message_type, MessageType::Ack);
    assert_eq!(at_a[0].source, B);
    assert_eq!(acked_sequence(&at_a[0]), Some(sent.sequence));
    assert_eq!(cluster.node(B).stats().acks_sent, 1);
}

/// Intermediate nodes do not carry unicast traffic for others, so a
/// unicast two hops away is lost.
#[test]
fn test_unicast_beyond_range_not_forwarded() {
    let mut cluster = TestCluster::chain(&[A, B, C]);
    cluster.node(A).send(
        C,
        MessageType::Incident,
        Priority::High,
        Bytes::from_static(b"to c"),
    );
    cluster.pump();

    assert!(cluster.delivered(B).is_empty());
    assert!(cluster.delivered(C).is_empty());
    assert!(cluster.medium.transmissions(B).is_empty());
}

// ============================================================================
// Routing and maintenance
// ============================================================================

#[test]
fn test_routes_learned_from_flood() {
    let mut cluster = TestCluster::chain(&[A, B, C]);
    cluster.node(A).send_heartbeat();
    cluster.pump();

    let route = cluster.node(C).route_to(A).unwrap();
    assert_eq!(route.next_hop, B);
    assert_eq!(route.hop_count, 1);
    assert_eq!(cluster.node(B).route_to(A).unwrap().next_hop, A);

    cluster.clock.advance(301);
    assert!(cluster.node(C).maintenance() > 0);
    assert!(cluster.node(C).routes().is_empty());
}

#[test]
fn test_send_failure_is_local() {
    let mut cluster = TestCluster::chain(&[A, B]);
    cluster.medium.set_failing(A, true);

    assert!(!cluster.node(A).send_heartbeat());
    cluster.pump();
    assert!(cluster.delivered(B).is_empty());
    assert_eq!(cluster.node(A).stats().send_errors, 1);

    cluster.medium.set_failing(A, false);
    assert!(cluster.node(A).send_heartbeat());
    cluster.pump();
    assert_eq!(cluster.delivered(B).len(), 1);
}
