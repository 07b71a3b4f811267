//! Gateway configuration
//!
//! One JSON document with a section per concern. Every section and field
//! has a default, so `{}` is a valid config.
//!
//! ```json
//! {
//!   "identity": { "settings_path": "/var/lib/fieldmesh/settings.json" },
//!   "meshtastic": { "reconnect": { "initial_delay": "5s", "max_delay": "1m" } },
//!   "backend": { "base_url": "http://10.0.0.2:8000", "upload_format": "json" },
//!   "logging": { "level": "debug" }
//! }
//! ```

use fieldmesh_core::{IdentityConfig, LoggingConfig};
use fieldmesh_mesh::MeshConfig;
use fieldmesh_meshtastic::MeshtasticConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{NodeError, Result};

/// Top-level gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Persisted node identity
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Mesh protocol settings for the simulated radio node
    #[serde(default)]
    pub mesh: MeshConfig,

    /// BLE transport and relay settings
    #[serde(default)]
    pub meshtastic: MeshtasticConfig,

    /// Incident backend
    #[serde(default)]
    pub backend: BackendConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    /// Load from `path`, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    NodeError::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
                let config: GatewayConfig = serde_json::from_str(&text)?;
                info!(path = %path.display(), "Loaded configuration");
                config
            }
            None => GatewayConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the gateway cannot run with
    pub fn validate(&self) -> Result<()> {
        self.meshtastic.validate()?;
        self.backend.validate()
    }
}

/// How decoded incidents are uploaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadFormat {
    /// Forward the incident blob verbatim to `/api/lora/incident`
    #[default]
    Binary,
    /// Post the decoded fields to `/api/incidents`
    Json,
}

/// Backend connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL, without a trailing path
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,

    /// Upload incidents received over BLE
    #[serde(default = "default_upload_incidents")]
    pub upload_incidents: bool,

    /// Upload encoding for full incident blobs
    #[serde(default)]
    pub upload_format: UploadFormat,

    /// Transcribe attached audio before a JSON upload
    #[serde(default)]
    pub transcribe_audio: bool,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_upload_incidents() -> bool {
    true
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout: default_request_timeout(),
            upload_incidents: default_upload_incidents(),
            upload_format: UploadFormat::default(),
            transcribe_audio: false,
        }
    }
}

impl BackendConfig {
    /// Reject unusable backend settings
    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(NodeError::Config(format!(
                "backend base_url must be http(s): {}",
                self.base_url
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(NodeError::Config("backend request_timeout must be > 0".into()));
        }
        Ok(())
    }
}

mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: GatewayConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.backend, BackendConfig::default());
        assert_eq!(config.meshtastic, MeshtasticConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_backend_section() {
        let config: GatewayConfig = serde_json::from_str(
            r#"{"backend": {"base_url": "https://ops.example", "request_timeout": "3s", "upload_format": "json"}}"#,
        )
        .unwrap();
        assert_eq!(config.backend.base_url, "https://ops.example");
        assert_eq!(config.backend.request_timeout, Duration::from_secs(3));
        assert_eq!(config.backend.upload_format, UploadFormat::Json);
        assert!(config.backend.upload_incidents);
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let config = BackendConfig {
            base_url: "ftp://nowhere".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(NodeError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"logging": {{"level": "debug"}}}}"#).unwrap();

        let config = GatewayConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.logging.level, fieldmesh_core::LogLevel::Debug);
    }

    #[test]
    fn test_load_missing_file() {
        let result = GatewayConfig::load(Some(Path::new("/nonexistent/fieldmesh.json")));
        assert!(matches!(result, Err(NodeError::Config(_))));
    }
}
