//! Minimal incident backend for tests

use axum::{
    body::Bytes,
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use fieldmesh_node::BackendConfig;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the backend has received
#[derive(Default)]
pub struct Recorded {
    pub json_incidents: Vec<Value>,
    pub binary_incidents: Vec<Vec<u8>>,
    pub binary_content_types: Vec<String>,
    pub transcriptions: usize,
}

#[derive(Clone, Default)]
pub struct MockBackend {
    pub recorded: Arc<Mutex<Recorded>>,
}

impl MockBackend {
    /// Serve on an ephemeral port; returns the base URL
    pub async fn start(&self) -> String {
        let app = Router::new()
            .route("/api/health", get(|| async { "OK" }))
            .route("/api/incidents", post(create_incident).get(list_incidents))
            .route("/api/lora/incident", post(create_binary_incident))
            .route("/api/lora/transcribe", post(transcribe))
            .with_state(self.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    pub fn config(base_url: &str) -> BackendConfig {
        BackendConfig {
            base_url: base_url.to_string(),
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    pub fn binary_count(&self) -> usize {
        self.recorded.lock().unwrap().binary_incidents.len()
    }
}

async fn create_incident(State(backend): State<MockBackend>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let mut recorded = backend.recorded.lock().unwrap();
    recorded.json_incidents.push(body);
    let id = recorded.json_incidents.len();
    (StatusCode::CREATED, Json(json!({ "id": id })))
}

async fn list_incidents() -> Json<Value> {
    let incidents: Vec<Value> = (1..=12)
        .map(|id| json!({ "id": id, "priority": "high", "description": "Smoke near the depot" }))
        .collect();
    Json(Value::Array(incidents))
}

async fn create_binary_incident(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Value> {
    let mut recorded = backend.recorded.lock().unwrap();
    recorded.binary_incidents.push(body.to_vec());
    recorded.binary_content_types.push(
        headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
    );
    Json(json!({ "id": format!("lora-{}", recorded.binary_incidents.len()) }))
}

async fn transcribe(State(backend): State<MockBackend>, body: Bytes) -> (StatusCode, Json<Value>) {
    if body.is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": "empty audio" })),
        );
    }
    backend.recorded.lock().unwrap().transcriptions += 1;
    (StatusCode::OK, Json(json!({ "text": "fire on level two" })))
}
