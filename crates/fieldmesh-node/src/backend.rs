//! HTTP client for the incident backend
//!
//! Covers the three endpoints the gateway consumes and serves as the
//! [`HttpExecutor`] behind the relay bridge.

use async_trait::async_trait;
use fieldmesh_core::{IncidentBinaryPayload, Priority};
use fieldmesh_mesh::IncidentSummary;
use fieldmesh_meshtastic::{HttpExecutor, HttpReply, MeshtasticError, RelayRequest};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::BackendConfig;
use crate::error::{NodeError, Result};

/// JSON incident upload path
pub const INCIDENTS_PATH: &str = "/api/incidents";

/// Binary incident upload path
pub const BINARY_INCIDENT_PATH: &str = "/api/lora/incident";

/// Audio transcription path
pub const TRANSCRIBE_PATH: &str = "/api/lora/transcribe";

/// Body of a JSON incident upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentUpload {
    /// Free text
    pub description: String,
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Altitude in meters
    pub altitude: f64,
    /// Triage priority
    pub priority: Priority,
    /// Reporting device, colon-separated hex; empty when unknown
    pub device_mac: String,
    /// Whether the report carried an image
    pub has_image: bool,
}

impl From<&IncidentBinaryPayload> for IncidentUpload {
    fn from(incident: &IncidentBinaryPayload) -> Self {
        Self {
            description: incident.description.clone(),
            latitude: incident.latitude(),
            longitude: incident.longitude(),
            altitude: f64::from(incident.altitude_m),
            priority: incident.priority,
            device_mac: incident.device_mac_string(),
            has_image: incident.has_image(),
        }
    }
}

impl From<&IncidentSummary> for IncidentUpload {
    fn from(summary: &IncidentSummary) -> Self {
        Self {
            description: summary.description.clone(),
            latitude: f64::from(summary.latitude),
            longitude: f64::from(summary.longitude),
            altitude: f64::from(summary.altitude),
            priority: Priority::Medium,
            device_mac: String::new(),
            has_image: false,
        }
    }
}

#[derive(Deserialize)]
struct TranscriptResponse {
    text: String,
}

/// Client for the incident backend
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    /// Build a client from config
    pub fn new(config: &BackendConfig) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Base URL without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Post decoded incident fields; returns the id the backend assigned
    pub async fn upload_incident_json(&self, incident: &IncidentUpload) -> Result<Option<String>> {
        let response = self
            .http
            .post(self.url(INCIDENTS_PATH))
            .json(incident)
            .send()
            .await?;
        let id = created_id(response).await?;
        info!(id = ?id, priority = %incident.priority, "Incident uploaded");
        Ok(id)
    }

    /// Forward an incident blob verbatim; returns the id the backend assigned
    pub async fn upload_incident_binary(&self, payload: &[u8]) -> Result<Option<String>> {
        let response = self
            .http
            .post(self.url(BINARY_INCIDENT_PATH))
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(payload.to_vec())
            .send()
            .await?;
        let id = created_id(response).await?;
        info!(id = ?id, bytes = payload.len(), "Binary incident uploaded");
        Ok(id)
    }

    /// Transcribe raw PCM audio
    pub async fn transcribe(&self, pcm: &[u8]) -> Result<String> {
        let response = self
            .http
            .post(self.url(TRANSCRIBE_PATH))
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(pcm.to_vec())
            .send()
            .await?;
        let response = check_status(response).await?;
        let transcript: TranscriptResponse = response.json().await?;
        info!(chars = transcript.text.chars().count(), "Audio transcribed");
        Ok(transcript.text)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(NodeError::Status { status, body })
}

/// `id` field of a creation response, string or number
async fn created_id(response: reqwest::Response) -> Result<Option<String>> {
    let response = check_status(response).await?;
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(None);
    }
    let value: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| NodeError::UnexpectedResponse(format!("{}: {}", e, text)))?;
    Ok(match value.get("id") {
        Some(serde_json::Value::String(id)) => Some(id.clone()),
        Some(serde_json::Value::Number(id)) => Some(id.to_string()),
        _ => None,
    })
}

#[async_trait]
impl HttpExecutor for BackendClient {
    async fn execute(&self, request: &RelayRequest) -> fieldmesh_meshtastic::Result<HttpReply> {
        if !request.path.starts_with('/') {
            return Err(MeshtasticError::Http(format!(
                "relay path must be absolute: {}",
                request.path
            )));
        }
        let method = reqwest::Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| MeshtasticError::Http(e.to_string()))?;

        let mut builder = self.http.request(method, self.url(&request.path));
        if let Some(body) = &request.body {
            let content_type = request.content_type.as_deref().unwrap_or("application/json");
            builder = builder.header(CONTENT_TYPE, content_type).body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| MeshtasticError::Http(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| MeshtasticError::Http(e.to_string()))?;
        debug!(req_id = %request.id, status, len = body.len(), "Relay upstream reply");
        Ok(HttpReply { status, body })
    }
}
