//! Persistent device identity
//!
//! Every radio node carries a 32-bit node id that doubles as its mesh
//! address. The id is derived once from the hardware MAC and then read back
//! from a [`SettingsStore`] on every start.
//!
//! Regenerating the id (wiping the settings store, swapping the MAC) makes
//! the node a stranger to its neighbours: routing entries and dedup state
//! held elsewhere in the mesh refer to the old id until they expire.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{CoreError, Result};

/// Broadcast destination sentinel; never a valid node id
pub const BROADCAST_ADDR: u32 = 0xFFFF_FFFF;

/// Advertised-name prefix shared by every fieldmesh radio
pub const DEVICE_NAME_PREFIX: &str = "FMESH_";

/// Settings key under which the node id is persisted
pub const NODE_ID_KEY: &str = "node_id";

/// Generic string key/value persistence
pub trait SettingsStore: Send {
    /// Read a value
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, persisting it before returning
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
}

/// In-memory settings, lost on drop
#[derive(Debug, Default, Clone)]
pub struct MemorySettings {
    values: HashMap<String, String>,
}

impl MemorySettings {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// JSON-object settings file
///
/// Writes go to a sibling temp file which is then renamed over the original.
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl FileSettings {
    /// Open a settings file, starting empty if it does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                CoreError::Settings(format!("{}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Settings file absent, starting empty");
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, values })
    }

    /// Path backing this store
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        let text = serde_json::to_string_pretty(&self.values)?;
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SettingsStore for FileSettings {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        self.flush()
    }
}

/// Identity of this radio node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Mesh address
    pub node_id: u32,
    /// Hardware MAC the id was derived from
    pub mac: [u8; 6],
}

impl DeviceIdentity {
    /// Load the persisted node id, or derive and persist one on first boot
    pub fn load_or_create(store: &mut dyn SettingsStore, mac: [u8; 6]) -> Result<Self> {
        if let Some(stored) = store.get(NODE_ID_KEY)? {
            let node_id = parse_node_id(&stored)?;
            debug!(node_id = format_args!("0x{:08x}", node_id), "Loaded node id");
            return Ok(Self { node_id, mac });
        }

        let node_id = derive_node_id(mac);
        store.set(NODE_ID_KEY, &format!("0x{:08x}", node_id))?;
        info!(
            node_id = format_args!("0x{:08x}", node_id),
            "Generated and persisted new node id"
        );
        Ok(Self { node_id, mac })
    }

    /// BLE advertised name: prefix plus the last two MAC bytes in hex
    pub fn advertised_name(&self) -> String {
        format!(
            "{}{:02x}{:02x}",
            DEVICE_NAME_PREFIX, self.mac[4], self.mac[5]
        )
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.node_id)
    }
}

/// Derive a node id from the low four MAC bytes
///
/// Falls back to a random id when the derived value collides with the
/// unassigned (0) or broadcast address.
pub fn derive_node_id(mac: [u8; 6]) -> u32 {
    let derived = u32::from_be_bytes([mac[2], mac[3], mac[4], mac[5]]);
    if derived != 0 && derived != BROADCAST_ADDR {
        return derived;
    }
    warn!("MAC-derived node id is reserved, falling back to random id");
    loop {
        let candidate: u32 = rand::random();
        if candidate != 0 && candidate != BROADCAST_ADDR {
            return candidate;
        }
    }
}

/// Whether an advertised name follows the fieldmesh convention
pub fn matches_device_name(name: &str) -> bool {
    match name.strip_prefix(DEVICE_NAME_PREFIX) {
        Some(suffix) => suffix.len() == 4 && suffix.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

/// Parse "aa:bb:cc:dd:ee:ff" (or dash/no separator) into bytes
pub fn parse_mac(text: &str) -> Result<[u8; 6]> {
    let compact: String = text
        .chars()
        .filter(|c| *c != ':' && *c != '-')
        .collect();
    let bytes = hex::decode(&compact).map_err(|e| CoreError::InvalidMac(format!("{}: {}", text, e)))?;
    bytes
        .try_into()
        .map_err(|_| CoreError::InvalidMac(format!("{}: expected 6 bytes", text)))
}

fn parse_node_id(text: &str) -> Result<u32> {
    let parsed = match text.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse::<u32>(),
    };
    parsed.map_err(|e| CoreError::Settings(format!("invalid stored node id {:?}: {}", text, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_node_id_from_mac() {
        let mac = [0xde, 0xad, 0x00, 0x00, 0x10, 0x01];
        assert_eq!(derive_node_id(mac), 0x0000_1001);
    }

    #[test]
    fn test_reserved_ids_fall_back_to_random() {
        let zero = derive_node_id([1, 2, 0, 0, 0, 0]);
        assert_ne!(zero, 0);
        assert_ne!(zero, BROADCAST_ADDR);

        let bcast = derive_node_id([1, 2, 0xff, 0xff, 0xff, 0xff]);
        assert_ne!(bcast, 0);
        assert_ne!(bcast, BROADCAST_ADDR);
    }

    #[test]
    fn test_load_or_create_persists() {
        let mut store = MemorySettings::new();
        let mac = [0, 1, 2, 3, 4, 5];

        let first = DeviceIdentity::load_or_create(&mut store, mac).unwrap();
        assert_eq!(first.node_id, 0x0203_0405);
        assert_eq!(store.get(NODE_ID_KEY).unwrap().as_deref(), Some("0x02030405"));

        // A different MAC does not change an already persisted id
        let second = DeviceIdentity::load_or_create(&mut store, [9, 9, 9, 9, 9, 9]).unwrap();
        assert_eq!(second.node_id, first.node_id);
    }

    #[test]
    fn test_corrupt_stored_id_is_an_error() {
        let mut store = MemorySettings::new();
        store.set(NODE_ID_KEY, "not-a-number").unwrap();
        assert!(DeviceIdentity::load_or_create(&mut store, [0; 6]).is_err());
    }

    #[test]
    fn test_file_settings_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        {
            let mut store = FileSettings::open(&path).unwrap();
            DeviceIdentity::load_or_create(&mut store, [0, 0, 0xca, 0xfe, 0xba, 0xbe]).unwrap();
        }

        let store = FileSettings::open(&path).unwrap();
        assert_eq!(store.get(NODE_ID_KEY).unwrap().as_deref(), Some("0xcafebabe"));
    }

    #[test]
    fn test_advertised_name() {
        let identity = DeviceIdentity {
            node_id: 1,
            mac: [0, 0, 0, 0, 0xa1, 0xb2],
        };
        assert_eq!(identity.advertised_name(), "FMESH_a1b2");
        assert!(matches_device_name(&identity.advertised_name()));
        assert!(!matches_device_name("Meshtastic_a1b2"));
        assert!(!matches_device_name("FMESH_zz12"));
        assert!(!matches_device_name("FMESH_a1b2c"));
    }

    #[test]
    fn test_parse_mac() {
        assert_eq!(parse_mac("00:01:02:03:04:05").unwrap(), [0, 1, 2, 3, 4, 5]);
        assert_eq!(parse_mac("aa-bb-cc-dd-ee-ff").unwrap(), [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert!(parse_mac("00:01:02").is_err());
        assert!(parse_mac("zz:01:02:03:04:05").is_err());
    }
}
