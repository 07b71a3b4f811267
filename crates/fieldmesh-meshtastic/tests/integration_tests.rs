//! Integration tests for the Meshtastic transport
//!
//! These tests run the public API end to end:
//! - Central role against a real peripheral over the in-memory link
//! - HTTP relay between a radio-only client and a gateway bridge
//! - Relay requests arriving over BLE and answered over BLE
//! - Chunk reassembly regardless of arrival order

use async_trait::async_trait;
use bytes::Bytes;
use fieldmesh_core::{DeviceIdentity, BROADCAST_ADDR};
use fieldmesh_meshtastic::packet::{encode_want_config, parse_from_radio};
use fieldmesh_meshtastic::relay::{split_chunks, ChunkFrame, Reassembler, RelayFrame};
use fieldmesh_meshtastic::test_utils::{MockLink, TextLoopback};
use fieldmesh_meshtastic::{
    CentralEvent, CentralHandle, CentralTransport, ConnectionState, FromRadioVariant,
    HandshakeState, HttpExecutor, HttpReply, MeshtasticConfig, MeshtasticConfigBuilder,
    MeshtasticError, PeripheralConnection, RelayBridge, RelayClient, RelayConfig, RelayRequest,
    RelayResponse, Result, SharedPeripheral,
};
use std::time::Duration;

// ============================================================================
// Test Infrastructure
// ============================================================================

const RADIO_NODE: u32 = 0x0000_1001;
const COMPANION: u32 = 0x0000_2002;

fn radio() -> SharedPeripheral {
    let identity = DeviceIdentity {
        node_id: RADIO_NODE,
        mac: [0x02, 0x00, 0x00, 0x00, 0x10, 0x01],
    };
    PeripheralConnection::new(identity, 32).shared()
}

fn spawn_central(link: MockLink, config: MeshtasticConfig) -> CentralHandle {
    let (transport, handle) = CentralTransport::new(link, config);
    tokio::spawn(transport.run());
    handle
}

/// Backend stub answering by path
struct StubBackend;

#[async_trait]
impl HttpExecutor for StubBackend {
    async fn execute(&self, request: &RelayRequest) -> Result<HttpReply> {
        match request.path.as_str() {
            "/api/health" => Ok(HttpReply {
                status: 200,
                body: "OK".into(),
            }),
            "/api/incidents" => Ok(HttpReply {
                status: 200,
                body: format!("[{}]", vec!["{\"id\":1,\"priority\":\"HIGH\"}"; 12].join(",")),
            }),
            "/api/echo" => Ok(HttpReply {
                status: 201,
                body: request.body.clone().unwrap_or_default(),
            }),
            _ => Err(MeshtasticError::Http("no route".into())),
        }
    }
}

/// Pump client texts into the bridge and bridge texts back into the client
fn wire_relay(
    client_out: tokio::sync::mpsc::UnboundedReceiver<(u32, String)>,
    bridge: RelayBridge<StubBackend, TextLoopback>,
    client: RelayClient<TextLoopback>,
    mut bridge_out: tokio::sync::mpsc::UnboundedReceiver<(u32, String)>,
) {
    let mut client_out = client_out;
    tokio::spawn(async move {
        while let Some((_, text)) = client_out.recv().await {
            bridge.handle_text(COMPANION, &text).await;
        }
    });
    tokio::spawn(async move {
        while let Some((to, text)) = bridge_out.recv().await {
            assert_eq!(to, COMPANION);
            client.handle_text(&text);
        }
    });
}

fn relay_pair() -> RelayClient<TextLoopback> {
    let config = RelayConfig {
        chunk_delay: Duration::ZERO,
        ..Default::default()
    };
    let (client_sender, client_out) = TextLoopback::channel();
    let (bridge_sender, bridge_out) = TextLoopback::channel();
    let client = RelayClient::new(client_sender, RADIO_NODE, config.clone());
    let bridge = RelayBridge::new(StubBackend, bridge_sender, config);
    wire_relay(client_out, bridge, client.clone(), bridge_out);
    client
}

// ============================================================================
// Central <-> Peripheral
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_central_completes_handshake_with_peripheral() {
    let radio = radio();
    let handle = spawn_central(MockLink::new(radio.clone()), MeshtasticConfig::default());

    handle.wait_for_state(ConnectionState::Ready).await.unwrap();
    assert!(radio.lock().is_ready());
    assert_eq!(radio.lock().stats().handshakes_completed, 1);

    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.handshakes_confirmed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_incident_payload_both_directions() {
    let radio = radio();
    let handle = spawn_central(MockLink::new(radio.clone()), MeshtasticConfig::default());
    let mut events = handle.subscribe();
    handle.wait_for_state(ConnectionState::Ready).await.unwrap();

    handle
        .send_payload(BROADCAST_ADDR, Bytes::from_static(b"\x02incident"))
        .await
        .unwrap();
    let inbound = radio.lock().take_payload().unwrap();
    assert_eq!(inbound.from, RADIO_NODE);
    assert_eq!(inbound.to, BROADCAST_ADDR);
    assert_eq!(&inbound.payload[..], b"\x02incident");

    radio
        .lock()
        .queue_payload(0x0000_3003, Bytes::from_static(b"from the mesh"));
    loop {
        if let CentralEvent::Payload { from, payload } = events.recv().await.unwrap() {
            assert_eq!(from, 0x0000_3003);
            assert_eq!(&payload[..], b"from the mesh");
            break;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_radio_drops() {
    let radio = radio();
    let link = MockLink::new(radio.clone());
    let config = MeshtasticConfigBuilder::new()
        .reconnect_delays(Duration::from_secs(1), Duration::from_secs(4))
        .build();
    let handle = spawn_central(link.clone(), config);
    handle.wait_for_state(ConnectionState::Ready).await.unwrap();

    link.drop_link();
    handle.wait_for_state(ConnectionState::Idle).await.unwrap();
    handle.wait_for_state(ConnectionState::Ready).await.unwrap();

    assert_eq!(link.connect_count(), 2);
    assert_eq!(radio.lock().stats().connections, 2);
}

#[tokio::test]
async fn test_peripheral_handshake_order() {
    let radio = radio();
    let mut conn = radio.lock();
    conn.on_connect();
    assert_eq!(conn.state(), HandshakeState::SendNothing);
    assert!(conn.read_from_radio().unwrap().is_empty());

    conn.handle_to_radio(&encode_want_config(77).unwrap());
    conn.queue_text(0x0000_3003, "queued during handshake");

    let mut order = Vec::new();
    loop {
        let record = conn.read_from_radio().unwrap();
        if record.is_empty() {
            break;
        }
        order.push(parse_from_radio(&record).unwrap().variant);
    }

    assert_eq!(order.len(), 4);
    assert!(matches!(&order[0], FromRadioVariant::MyInfo(info) if info.my_node_num == RADIO_NODE));
    assert!(matches!(&order[1], FromRadioVariant::NodeInfo(info) if info.num == RADIO_NODE));
    assert!(matches!(&order[2], FromRadioVariant::ConfigCompleteId(77)));
    assert!(matches!(&order[3], FromRadioVariant::Packet(_)));
    assert!(conn.is_ready());
}

// ============================================================================
// HTTP Relay
// ============================================================================

#[tokio::test]
async fn test_relay_health_check_round_trip() {
    let client = relay_pair();
    let response = client.request("GET", "/api/health", None, None).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body, "OK");
    assert_eq!(client.pending(), 0);
}

#[tokio::test]
async fn test_relay_large_response_is_reassembled() {
    let client = relay_pair();
    let response = client
        .request("GET", "/api/incidents", None, None)
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert!(response.body.len() > 230);
    assert!(response.body.starts_with("[{\"id\":1"));
}

#[tokio::test]
async fn test_relay_post_with_body() {
    let client = relay_pair();
    let response = client
        .request(
            "POST",
            "/api/echo",
            Some("{\"note\":\"bridge out\"}".into()),
            Some("application/json".into()),
        )
        .await
        .unwrap();

    assert_eq!(response.status, 201);
    assert_eq!(response.body, "{\"note\":\"bridge out\"}");
}

#[tokio::test]
async fn test_relay_unknown_route_is_bad_gateway() {
    let client = relay_pair();
    let response = client.request("GET", "/nowhere", None, None).await.unwrap();
    assert_eq!(response.status, 502);
}

#[tokio::test(start_paused = true)]
async fn test_relay_over_ble() {
    let radio = radio();
    let config = MeshtasticConfig::default();
    let handle = spawn_central(MockLink::new(radio.clone()), config.clone());
    let bridge = RelayBridge::new(StubBackend, handle.clone(), config.relay.clone());
    tokio::spawn(bridge.run(handle.subscribe()));
    handle.wait_for_state(ConnectionState::Ready).await.unwrap();

    radio.lock().queue_text(
        COMPANION,
        r#"HTTPREQ:{"id":"r1","method":"GET","path":"/api/health"}"#,
    );

    let reply = loop {
        if let Some(text) = radio.lock().take_text() {
            break text;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    };
    assert_eq!(reply.to, COMPANION);
    assert_eq!(
        reply.text,
        r#"HTTPRES:{"req_id":"r1","status":200,"body":"OK"}"#
    );
}

// ============================================================================
// Chunking
// ============================================================================

#[test]
fn test_chunks_reassemble_in_any_order() {
    let body = "é".repeat(150) + &"z".repeat(200);
    let json = RelayResponse::new("ab12cd34", 200, body.clone())
        .to_json()
        .unwrap();
    let pieces = split_chunks(&json, 180);
    assert!(pieces.len() >= 3);
    assert!(pieces.iter().all(|p| p.len() <= 180));

    let count = pieces.len() as u32;
    let frames: Vec<String> = pieces
        .iter()
        .enumerate()
        .map(|(i, text)| {
            ChunkFrame {
                req_id: "ab12cd34".into(),
                index: i as u32,
                count,
                text: text.to_string(),
            }
            .to_frame()
        })
        .collect();

    let mut order: Vec<usize> = (0..frames.len()).collect();
    order.rotate_left(1);
    order.swap(0, 1);

    let mut reassembler = Reassembler::new(Duration::from_secs(120));
    let mut assembled = None;
    for i in order {
        let Some(RelayFrame::Chunk(chunk)) = RelayFrame::parse(&frames[i]).unwrap() else {
            panic!("expected chunk frame");
        };
        if let Some(done) = reassembler.accept(chunk).unwrap() {
            assembled = Some(done);
        }
    }

    let response: RelayResponse = serde_json::from_str(&assembled.unwrap()).unwrap();
    assert_eq!(response.body, body);
    assert!(reassembler.is_empty());
}
