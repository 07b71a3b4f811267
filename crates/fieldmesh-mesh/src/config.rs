//! Mesh protocol configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest frame the radio carries
pub const LORA_MAX_PAYLOAD: usize = 237;

/// Packets at or above this hop count are not relayed
pub const MAX_HOPS: u8 = 5;

/// TTL stamped on originated packets, in seconds
pub const DEFAULT_TTL: u8 = 60;

/// Mesh protocol configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Hop count at which relaying stops
    #[serde(default = "default_max_hops")]
    pub max_hops: u8,

    /// TTL for originated packets (seconds)
    #[serde(default = "default_ttl")]
    pub default_ttl: u8,

    /// Interval between heartbeats
    #[serde(with = "humantime_serde", default = "default_sixty_seconds")]
    pub heartbeat_interval: Duration,

    /// Interval between route/dedup sweeps
    #[serde(with = "humantime_serde", default = "default_sixty_seconds")]
    pub maintenance_interval: Duration,

    /// Age after which routes and dedup entries are dropped
    #[serde(with = "humantime_serde", default = "default_entry_ttl")]
    pub entry_ttl: Duration,

    /// Dedup cache capacity (entries)
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,

    /// Local delivery queue depth; oldest dropped when full
    #[serde(default = "default_delivery_queue")]
    pub delivery_queue_size: usize,

    /// How often the service polls the radio
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
}

fn default_max_hops() -> u8 {
    MAX_HOPS
}

fn default_ttl() -> u8 {
    DEFAULT_TTL
}

fn default_sixty_seconds() -> Duration {
    Duration::from_secs(60)
}

fn default_entry_ttl() -> Duration {
    Duration::from_secs(300) // 5 minutes
}

fn default_dedup_capacity() -> usize {
    512
}

fn default_delivery_queue() -> usize {
    64
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(50)
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            max_hops: MAX_HOPS,
            default_ttl: DEFAULT_TTL,
            heartbeat_interval: default_sixty_seconds(),
            maintenance_interval: default_sixty_seconds(),
            entry_ttl: default_entry_ttl(),
            dedup_capacity: default_dedup_capacity(),
            delivery_queue_size: default_delivery_queue(),
            poll_interval: default_poll_interval(),
        }
    }
}

impl MeshConfig {
    /// Entry TTL in whole seconds, as compared against packet timestamps
    pub fn entry_ttl_secs(&self) -> u32 {
        self.entry_ttl.as_secs().min(u32::MAX as u64) as u32
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
