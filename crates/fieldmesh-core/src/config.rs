//! Configuration shared by every fieldmesh runtime
//!
//! Identity and logging settings. Transport and relay settings live with
//! the crates that use them.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{CoreError, Result};
use crate::identity::parse_mac;

/// Identity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Settings file holding the persisted node id
    #[serde(default = "default_settings_path")]
    pub settings_path: PathBuf,
    /// Hardware MAC used to derive the node id on first boot
    #[serde(default)]
    pub mac: Option<String>,
}

fn default_settings_path() -> PathBuf {
    PathBuf::from("fieldmesh-settings.json")
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            settings_path: default_settings_path(),
            mac: None,
        }
    }
}

impl IdentityConfig {
    /// Parsed MAC, or a random locally administered one when unset
    pub fn mac_bytes(&self) -> Result<[u8; 6]> {
        match &self.mac {
            Some(text) => parse_mac(text),
            None => {
                let mut mac: [u8; 6] = rand::random();
                // Locally administered, unicast
                mac[0] = (mac[0] | 0x02) & 0xfe;
                Ok(mac)
            }
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default)]
    pub level: LogLevel,
    /// Log format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Pretty,
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by env-filter
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(CoreError::InvalidConfig(format!("unknown log level {}", other))),
        }
    }
}

/// Log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}
