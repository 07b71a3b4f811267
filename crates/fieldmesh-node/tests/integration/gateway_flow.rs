//! Gateway runtime tests over the simulated radio node

use fieldmesh_core::{BinaryIncidentCodec, DeviceIdentity, Location, Priority};
use fieldmesh_mesh::MeshConfig;
use fieldmesh_meshtastic::MeshtasticConfig;
use fieldmesh_node::{Gateway, GatewayConfig, SimulatedRadio, UploadFormat};
use std::time::Duration;
use tokio::sync::oneshot;

use super::mock_backend::MockBackend;

fn radio_identity() -> DeviceIdentity {
    DeviceIdentity {
        node_id: 0x0000_c0de,
        mac: [0x02, 0x00, 0x00, 0x00, 0xc0, 0xde],
    }
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_field_report_uploaded_verbatim() {
    let backend = MockBackend::default();
    let base_url = backend.start().await;
    let config = GatewayConfig {
        backend: MockBackend::config(&base_url),
        ..Default::default()
    };

    let sim = SimulatedRadio::spawn(radio_identity(), &MeshConfig::default(), &config.meshtastic);
    let gateway = Gateway::new(sim.link.clone(), config).unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let run = tokio::spawn(gateway.run(async {
        let _ = stop_rx.await;
    }));

    assert!(sim
        .report("Bridge collapsed", Location::new(50.94, 6.96, 53.0), Priority::Critical)
        .await
        .unwrap());
    wait_until(|| backend.binary_count() == 1).await;

    stop_tx.send(()).unwrap();
    let stats = run.await.unwrap().unwrap();
    assert_eq!(stats.uploaded, 1);
    assert_eq!(stats.failed, 0);

    let blob = backend.recorded.lock().unwrap().binary_incidents[0].clone();
    let incident = BinaryIncidentCodec::decode(&blob).unwrap();
    assert_eq!(incident.description, "Bridge collapsed");
    assert_eq!(incident.priority, Priority::Critical);
    sim.shutdown().await;
}

#[tokio::test]
async fn test_field_report_uploaded_as_json() {
    let backend = MockBackend::default();
    let base_url = backend.start().await;
    let mut config = GatewayConfig {
        backend: MockBackend::config(&base_url),
        meshtastic: MeshtasticConfig::default(),
        ..Default::default()
    };
    config.backend.upload_format = UploadFormat::Json;

    let sim = SimulatedRadio::spawn(radio_identity(), &MeshConfig::default(), &config.meshtastic);
    let gateway = Gateway::new(sim.link.clone(), config).unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let run = tokio::spawn(gateway.run(async {
        let _ = stop_rx.await;
    }));

    sim.report("Power line down", Location::new(47.37, 8.54, 408.0), Priority::Low)
        .await
        .unwrap();
    wait_until(|| !backend.recorded.lock().unwrap().json_incidents.is_empty()).await;

    stop_tx.send(()).unwrap();
    run.await.unwrap().unwrap();

    let recorded = backend.recorded.lock().unwrap();
    let body = &recorded.json_incidents[0];
    assert_eq!(body["description"], "Power line down");
    assert_eq!(body["priority"], "low");
    assert_eq!(body["device_mac"], "02:00:f1:e1:d0:01");
    drop(recorded);
    sim.shutdown().await;
}
