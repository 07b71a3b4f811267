//! Gateway runtime
//!
//! Connects to a radio node as BLE central and serves two flows:
//!
//! - PRIVATE_APP payloads from the mesh are decoded and uploaded to the
//!   backend
//! - `HTTPREQ` texts are executed against the backend by a
//!   [`RelayBridge`] and answered over the same link

use fieldmesh_core::BinaryIncidentCodec;
use fieldmesh_mesh::IncidentSummary;
use fieldmesh_meshtastic::{BleLink, CentralEvent, CentralTransport, RelayBridge};
use std::future::Future;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendClient, IncidentUpload};
use crate::config::{BackendConfig, GatewayConfig, UploadFormat};
use crate::error::{NodeError, Result};

/// Upload counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadStats {
    /// Payloads accepted by the backend
    pub uploaded: u64,
    /// Payloads the backend refused or never answered
    pub failed: u64,
    /// Payloads that decoded as neither incident format
    pub undecodable: u64,
    /// Payloads received while uploads were disabled
    pub skipped: u64,
}

/// Decodes mesh payloads and uploads them
pub struct IncidentUploader {
    backend: BackendClient,
    enabled: bool,
    format: UploadFormat,
    transcribe_audio: bool,
    stats: UploadStats,
}

impl IncidentUploader {
    /// Create an uploader for `backend`
    pub fn new(backend: BackendClient, config: &BackendConfig) -> Self {
        Self {
            backend,
            enabled: config.upload_incidents,
            format: config.upload_format,
            transcribe_audio: config.transcribe_audio,
            stats: UploadStats::default(),
        }
    }

    /// Counter snapshot
    pub fn stats(&self) -> UploadStats {
        self.stats.clone()
    }

    /// Upload one payload received from node `from`
    ///
    /// Returns the backend id, if it assigned one.
    pub async fn handle_payload(&mut self, from: u32, payload: &[u8]) -> Result<Option<String>> {
        if !self.enabled {
            debug!(from, len = payload.len(), "Upload disabled, payload dropped");
            self.stats.skipped += 1;
            return Ok(None);
        }

        let result = self.upload(from, payload).await;
        match &result {
            Ok(_) => self.stats.uploaded += 1,
            Err(NodeError::Undecodable(reason)) => {
                warn!(from = %format!("0x{:08x}", from), "Dropping payload: {}", reason);
                self.stats.undecodable += 1;
            }
            Err(e) => {
                error!(from = %format!("0x{:08x}", from), "Upload failed: {}", e);
                self.stats.failed += 1;
            }
        }
        result
    }

    async fn upload(&self, from: u32, payload: &[u8]) -> Result<Option<String>> {
        if let Ok(incident) = BinaryIncidentCodec::decode(payload) {
            info!(
                from = %format!("0x{:08x}", from),
                priority = %incident.priority,
                image = incident.has_image(),
                audio = incident.has_audio(),
                "Incident received"
            );
            return match self.format {
                UploadFormat::Binary => self.backend.upload_incident_binary(payload).await,
                UploadFormat::Json => {
                    let mut upload = IncidentUpload::from(&incident);
                    if let (true, Some(audio)) = (self.transcribe_audio, &incident.audio) {
                        match self.backend.transcribe(audio).await {
                            Ok(text) if !text.is_empty() => {
                                upload.description.push('\n');
                                upload.description.push_str(&text);
                            }
                            Ok(_) => {}
                            Err(e) => warn!("Transcription failed, uploading without it: {}", e),
                        }
                    }
                    self.backend.upload_incident_json(&upload).await
                }
            };
        }

        let summary =
            IncidentSummary::decode(payload).map_err(|e| NodeError::Undecodable(e.to_string()))?;
        info!(from = %format!("0x{:08x}", from), "Incident summary received");
        self.backend
            .upload_incident_json(&IncidentUpload::from(&summary))
            .await
    }
}

/// BLE central plus uploader plus relay bridge
pub struct Gateway<L: BleLink> {
    link: L,
    config: GatewayConfig,
    backend: BackendClient,
}

impl<L: BleLink + 'static> Gateway<L> {
    /// Prepare a gateway over `link`
    pub fn new(link: L, config: GatewayConfig) -> Result<Self> {
        config.validate()?;
        let backend = BackendClient::new(&config.backend)?;
        Ok(Self {
            link,
            config,
            backend,
        })
    }

    /// Run until `shutdown` resolves; returns the upload counters
    pub async fn run<F>(self, shutdown: F) -> Result<UploadStats>
    where
        F: Future<Output = ()>,
    {
        info!(
            link = self.link.name(),
            backend = self.backend.base_url(),
            "Starting gateway"
        );

        let (transport, central) = CentralTransport::new(self.link, self.config.meshtastic.clone());
        let mut events = central.subscribe();
        let relay_events = central.subscribe();

        let transport_task = tokio::spawn(async move {
            if let Err(e) = transport.run().await {
                error!("Central transport error: {}", e);
            }
        });
        let relay = RelayBridge::new(
            self.backend.clone(),
            central.clone(),
            self.config.meshtastic.relay.clone(),
        );
        let relay_task = tokio::spawn(relay.run(relay_events));

        let mut uploader = IncidentUploader::new(self.backend, &self.config.backend);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Gateway shutdown requested");
                    break;
                }
                event = events.recv() => match event {
                    Ok(CentralEvent::Payload { from, payload }) => {
                        // Failures are counted and logged by the uploader
                        let _ = uploader.handle_payload(from, &payload).await;
                    }
                    Ok(CentralEvent::StateChanged(state)) => {
                        info!(%state, "Radio link state");
                    }
                    Ok(CentralEvent::Text { .. }) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Gateway lagged behind transport events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        if let Err(e) = central.shutdown().await {
            debug!("Transport already stopped: {}", e);
        }
        let _ = transport_task.await;
        relay_task.abort();

        let stats = uploader.stats();
        info!(
            uploaded = stats.uploaded,
            failed = stats.failed,
            undecodable = stats.undecodable,
            "Gateway stopped"
        );
        Ok(stats)
    }
}
