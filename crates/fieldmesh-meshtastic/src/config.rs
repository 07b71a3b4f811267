//! Configuration types for the Meshtastic transport and relay
//!
//! Every field has a serde default so a partial JSON document fills in the
//! rest. Durations are written in humantime form ("5s", "2m").

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{MeshtasticError, Result};

/// Handshake poll cadence
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Handshake deadline before proceeding unconfirmed
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// First reconnect delay
pub const DEFAULT_RECONNECT_INITIAL: Duration = Duration::from_secs(5);

/// Reconnect delay cap
pub const DEFAULT_RECONNECT_MAX: Duration = Duration::from_secs(60);

/// Largest relay text sent as a single message
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 230;

/// Relay chunk text size in bytes
pub const DEFAULT_CHUNK_SIZE: usize = 180;

/// Most chunks a single relayed response may span
pub const DEFAULT_MAX_CHUNKS: u32 = 512;

/// Most incomplete responses held for reassembly at once
pub const DEFAULT_MAX_PARTIALS: usize = 16;

/// Main configuration for the Meshtastic transport
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshtasticConfig {
    /// Central role settings
    #[serde(default)]
    pub central: CentralConfig,

    /// Peripheral role settings
    #[serde(default)]
    pub peripheral: PeripheralConfig,

    /// Reconnection settings
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// HTTP relay settings
    #[serde(default)]
    pub relay: RelayConfig,
}

impl MeshtasticConfig {
    /// Reject settings the transport cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.central.poll_interval.is_zero() {
            return Err(MeshtasticError::InvalidConfig(
                "central.poll_interval must be non-zero".into(),
            ));
        }
        if self.reconnect.initial_delay > self.reconnect.max_delay {
            return Err(MeshtasticError::InvalidConfig(format!(
                "reconnect.initial_delay ({}) exceeds max_delay ({})",
                humantime::format_duration(self.reconnect.initial_delay),
                humantime::format_duration(self.reconnect.max_delay)
            )));
        }
        if self.relay.chunk_size == 0 || self.relay.chunk_size > self.relay.max_message_size {
            return Err(MeshtasticError::InvalidConfig(format!(
                "relay.chunk_size must be in 1..={}",
                self.relay.max_message_size
            )));
        }
        if self.relay.max_chunks == 0 || self.relay.max_partials == 0 {
            return Err(MeshtasticError::InvalidConfig(
                "relay.max_chunks and relay.max_partials must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Central (companion/gateway) settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CentralConfig {
    /// How long each scan listens for advertisements
    #[serde(with = "humantime_serde", default = "default_scan_window")]
    pub scan_window: Duration,

    /// Deadline for the config handshake
    #[serde(with = "humantime_serde", default = "default_handshake_timeout")]
    pub handshake_timeout: Duration,

    /// FromRadio poll cadence during the handshake
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,

    /// Capacity of the event broadcast channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_scan_window() -> Duration {
    Duration::from_secs(5)
}

fn default_handshake_timeout() -> Duration {
    DEFAULT_HANDSHAKE_TIMEOUT
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn default_event_buffer() -> usize {
    256
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            scan_window: default_scan_window(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            event_buffer: default_event_buffer(),
        }
    }
}

/// Peripheral (radio node) settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeripheralConfig {
    /// Depth of each per-connection queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How often the radio bridge drains companion writes
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub bridge_poll_interval: Duration,
}

fn default_queue_capacity() -> usize {
    crate::peripheral::DEFAULT_QUEUE_CAPACITY
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            bridge_poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Reconnection behavior configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Enable automatic reconnection
    #[serde(default = "default_auto_reconnect")]
    pub enabled: bool,

    /// Initial delay before first reconnection attempt
    #[serde(with = "humantime_serde", default = "default_initial_delay")]
    pub initial_delay: Duration,

    /// Maximum delay between reconnection attempts
    #[serde(with = "humantime_serde", default = "default_max_delay")]
    pub max_delay: Duration,

    /// Maximum number of consecutive failed attempts (0 = infinite)
    #[serde(default)]
    pub max_attempts: u32,
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_initial_delay() -> Duration {
    DEFAULT_RECONNECT_INITIAL
}

fn default_max_delay() -> Duration {
    DEFAULT_RECONNECT_MAX
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: DEFAULT_RECONNECT_INITIAL,
            max_delay: DEFAULT_RECONNECT_MAX,
            max_attempts: 0, // Infinite
        }
    }
}

/// HTTP-over-mesh relay settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Upstream HTTP timeout
    #[serde(with = "humantime_serde", default = "default_http_timeout")]
    pub http_timeout: Duration,

    /// Largest response text sent unchunked
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Chunk text size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Pause between chunks
    #[serde(with = "humantime_serde", default = "default_chunk_delay")]
    pub chunk_delay: Duration,

    /// How long partial responses are kept
    #[serde(with = "humantime_serde", default = "default_reassembly_timeout")]
    pub reassembly_timeout: Duration,

    /// Chunk count above which a chunk is rejected
    #[serde(default = "default_max_chunks")]
    pub max_chunks: u32,

    /// Incomplete responses held at once; the oldest is evicted beyond this
    #[serde(default = "default_max_partials")]
    pub max_partials: usize,

    /// How long a client waits for its response
    #[serde(with = "humantime_serde", default = "default_client_timeout")]
    pub client_timeout: Duration,
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_chunk_delay() -> Duration {
    Duration::from_millis(250)
}

fn default_reassembly_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_max_chunks() -> u32 {
    DEFAULT_MAX_CHUNKS
}

fn default_max_partials() -> usize {
    DEFAULT_MAX_PARTIALS
}

fn default_client_timeout() -> Duration {
    Duration::from_secs(60)
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            http_timeout: default_http_timeout(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_delay: default_chunk_delay(),
            reassembly_timeout: default_reassembly_timeout(),
            max_chunks: DEFAULT_MAX_CHUNKS,
            max_partials: DEFAULT_MAX_PARTIALS,
            client_timeout: default_client_timeout(),
        }
    }
}

/// Builder for MeshtasticConfig
#[derive(Debug, Default)]
pub struct MeshtasticConfigBuilder {
    config: MeshtasticConfig,
}

impl MeshtasticConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scan window
    pub fn scan_window(mut self, window: Duration) -> Self {
        self.config.central.scan_window = window;
        self
    }

    /// Set the handshake deadline
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.central.handshake_timeout = timeout;
        self
    }

    /// Enable or disable auto-reconnect
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.reconnect.enabled = enabled;
        self
    }

    /// Set reconnect backoff bounds
    pub fn reconnect_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.config.reconnect.initial_delay = initial;
        self.config.reconnect.max_delay = max;
        self
    }

    /// Set the per-connection queue depth
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.peripheral.queue_capacity = capacity.max(1);
        self
    }

    /// Set the upstream HTTP timeout
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.config.relay.http_timeout = timeout;
        self
    }

    /// Set relay chunk size
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.relay.chunk_size = size;
        self
    }

    /// Set the pause between relay chunks
    pub fn chunk_delay(mut self, delay: Duration) -> Self {
        self.config.relay.chunk_delay = delay;
        self
    }

    /// Build the configuration
    pub fn build(self) -> MeshtasticConfig {
        self.config
    }
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
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

    #[test]
    fn test_default_config() {
        let config = MeshtasticConfig::default();
        assert!(config.reconnect.enabled);
        assert_eq!(config.reconnect.initial_delay, Duration::from_secs(5));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(60));
        assert_eq!(config.central.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.central.poll_interval, Duration::from_millis(100));
        assert_eq!(config.relay.http_timeout, Duration::from_secs(15));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = MeshtasticConfigBuilder::new()
            .auto_reconnect(false)
            .chunk_size(100)
            .queue_capacity(0)
            .build();

        assert!(!config.reconnect.enabled);
        assert_eq!(config.relay.chunk_size, 100);
        assert_eq!(config.peripheral.queue_capacity, 1);
    }

    #[test]
    fn test_partial_json() {
        let config: MeshtasticConfig =
            serde_json::from_str(r#"{"reconnect": {"initial_delay": "2s"}, "relay": {}}"#).unwrap();
        assert_eq!(config.reconnect.initial_delay, Duration::from_secs(2));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(60));
        assert_eq!(config.relay.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_validation() {
        let config = MeshtasticConfigBuilder::new().chunk_size(500).build();
        assert!(config.validate().is_err());

        let config = MeshtasticConfigBuilder::new()
            .reconnect_delays(Duration::from_secs(90), Duration::from_secs(60))
            .build();
        assert!(matches!(
            config.validate(),
            Err(MeshtasticError::InvalidConfig(_))
        ));
    }
}
