//! Backend client and relay executor tests

use fieldmesh_core::{BinaryIncidentCodec, Location, Priority};
use fieldmesh_meshtastic::relay::{Reassembler, RelayFrame};
use fieldmesh_meshtastic::test_utils::TextLoopback;
use fieldmesh_meshtastic::{RelayBridge, RelayConfig, RelayResponse};
use fieldmesh_node::{BackendClient, IncidentUpload, NodeError};
use std::time::Duration;

use super::mock_backend::MockBackend;

fn drone_blob() -> bytes::Bytes {
    BinaryIncidentCodec::encode(
        "Drone spotted",
        Location::new(52.520008, 13.404954, 34.5),
        [0, 1, 2, 3, 4, 5],
        Priority::High,
        None,
    )
    .unwrap()
}

async fn client() -> (BackendClient, MockBackend) {
    let backend = MockBackend::default();
    let base_url = backend.start().await;
    let client = BackendClient::new(&MockBackend::config(&base_url)).unwrap();
    (client, backend)
}

// ============================================================================
// Incident Uploads
// ============================================================================

#[tokio::test]
async fn test_upload_incident_json() {
    let (client, backend) = client().await;
    let incident = BinaryIncidentCodec::decode(&drone_blob()).unwrap();

    let id = client
        .upload_incident_json(&IncidentUpload::from(&incident))
        .await
        .unwrap();
    assert_eq!(id.as_deref(), Some("1"));

    let recorded = backend.recorded.lock().unwrap();
    let body = &recorded.json_incidents[0];
    assert_eq!(body["description"], "Drone spotted");
    assert_eq!(body["priority"], "high");
    assert_eq!(body["device_mac"], "00:01:02:03:04:05");
    assert_eq!(body["altitude"], 34.0);
    assert_eq!(body["has_image"], false);
}

#[tokio::test]
async fn test_upload_incident_binary_verbatim() {
    let (client, backend) = client().await;
    let blob = drone_blob();

    let id = client.upload_incident_binary(&blob).await.unwrap();
    assert_eq!(id.as_deref(), Some("lora-1"));

    let recorded = backend.recorded.lock().unwrap();
    assert_eq!(recorded.binary_incidents[0], blob.to_vec());
    assert_eq!(recorded.binary_content_types[0], "application/octet-stream");
}

#[tokio::test]
async fn test_transcribe() {
    let (client, backend) = client().await;
    let text = client.transcribe(&[0u8; 320]).await.unwrap();
    assert_eq!(text, "fire on level two");
    assert_eq!(backend.recorded.lock().unwrap().transcriptions, 1);
}

#[tokio::test]
async fn test_error_status_surfaces() {
    let (client, _backend) = client().await;
    match client.transcribe(&[]).await {
        Err(NodeError::Status { status, body }) => {
            assert_eq!(status, 422);
            assert!(body.contains("empty audio"));
        }
        other => panic!("expected status error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_backend_is_retriable() {
    let client = BackendClient::new(&MockBackend::config("http://127.0.0.1:9")).unwrap();
    let err = client.upload_incident_binary(b"x").await.unwrap_err();
    assert!(matches!(err, NodeError::Request(_)));
    assert!(err.is_retriable());
}

// ============================================================================
// Relay Executor
// ============================================================================

#[tokio::test]
async fn test_relay_health_against_backend() {
    let (client, _backend) = client().await;
    let sender = TextLoopback::new();
    let bridge = RelayBridge::new(client, sender.clone(), RelayConfig::default());

    let response = bridge
        .handle_text(
            0x1001,
            r#"HTTPREQ:{"id":"r1","method":"GET","path":"/api/health"}"#,
        )
        .await
        .unwrap();

    assert_eq!(response, RelayResponse::new("r1", 200, "OK"));
    assert_eq!(
        sender.take(),
        vec![(
            0x1001,
            r#"HTTPRES:{"req_id":"r1","status":200,"body":"OK"}"#.to_string()
        )]
    );
}

#[tokio::test]
async fn test_relay_large_listing_is_chunked() {
    let (client, _backend) = client().await;
    let sender = TextLoopback::new();
    let config = RelayConfig {
        chunk_delay: Duration::ZERO,
        ..Default::default()
    };
    let bridge = RelayBridge::new(client, sender.clone(), config);

    let response = bridge
        .handle_text(
            0x1001,
            r#"HTTPREQ:{"id":"list1","method":"GET","path":"/api/incidents"}"#,
        )
        .await
        .unwrap();
    assert_eq!(response.status, 200);

    let frames = sender.take();
    assert!(frames.len() > 1);
    let mut reassembler = Reassembler::new(Duration::from_secs(120));
    let mut json = None;
    for (_, frame) in frames {
        let Some(RelayFrame::Chunk(chunk)) = RelayFrame::parse(&frame).unwrap() else {
            panic!("expected chunk frame: {}", frame);
        };
        if let Some(done) = reassembler.accept(chunk).unwrap() {
            json = Some(done);
        }
    }
    let reassembled: RelayResponse = serde_json::from_str(&json.unwrap()).unwrap();
    assert_eq!(reassembled, response);

    let listing: serde_json::Value = serde_json::from_str(&reassembled.body).unwrap();
    assert_eq!(listing.as_array().unwrap().len(), 12);
}

#[tokio::test]
async fn test_relay_post_reaches_backend() {
    let (client, backend) = client().await;
    let sender = TextLoopback::new();
    let bridge = RelayBridge::new(client, sender, RelayConfig::default());

    let request = fieldmesh_meshtastic::RelayRequest::new("p1", "POST", "/api/incidents")
        .with_body(
            r#"{"description":"Gas smell","latitude":1.0,"longitude":2.0,"altitude":0.0,"priority":"low","device_mac":"","has_image":false}"#,
            Some("application/json".into()),
        )
        .to_frame()
        .unwrap();
    let response = bridge.handle_text(0x2002, &request).await.unwrap();

    assert_eq!(response.status, 201);
    assert_eq!(response.body, r#"{"id":1}"#);
    assert_eq!(
        backend.recorded.lock().unwrap().json_incidents[0]["description"],
        "Gas smell"
    );
}

#[tokio::test]
async fn test_relay_unreachable_backend_is_502() {
    let client = BackendClient::new(&MockBackend::config("http://127.0.0.1:9")).unwrap();
    let bridge = RelayBridge::new(client, TextLoopback::new(), RelayConfig::default());
    let response = bridge
        .handle_text(1, r#"HTTPREQ:{"id":"r5","method":"GET","path":"/api/health"}"#)
        .await
        .unwrap();
    assert_eq!(response.status, 502);
    assert_eq!(response.req_id, "r5");
}
