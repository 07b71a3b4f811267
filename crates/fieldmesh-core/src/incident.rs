//! Compact binary incident payload for kilobit-class radio links
//!
//! # Layout
//!
//! Multi-byte integers are little-endian.
//!
//! ```text
//! version      u8
//! flags        u8   bit0 = image, bit1 = audio, bits2-3 = priority
//! latitude     i32  degrees * 1e7
//! longitude    i32  degrees * 1e7
//! altitude     i16  whole meters
//! device_mac   [u8; 6]
//! desc_len     u8
//! description  desc_len bytes of UTF-8
//! [image_len   u16, image bytes]   if bit0
//! [audio_len   u32, audio bytes]   if bit1
//! ```
//!
//! The description is capped at 255 encoded bytes. The cap counts bytes,
//! not characters, so a multi-byte character straddling the cap is cut and
//! decodes lossily.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};
use crate::location::{e7_to_degrees, Location};

/// Current payload version byte
pub const INCIDENT_PAYLOAD_VERSION: u8 = 1;

/// Maximum encoded description length
pub const MAX_DESCRIPTION_BYTES: usize = 255;

/// Maximum image length expressible by the u16 prefix
pub const MAX_IMAGE_BYTES: usize = u16::MAX as usize;

/// Bytes before the description
pub const INCIDENT_HEADER_SIZE: usize = 19;

const FLAG_IMAGE: u8 = 0x01;
const FLAG_AUDIO: u8 = 0x02;
const PRIORITY_SHIFT: u8 = 2;
const PRIORITY_MASK: u8 = 0x03;

/// Incident and message priority, shared by the payload flags and the mesh envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Life-safety; highest
    Critical,
    /// Urgent
    High,
    /// Routine
    Medium,
    /// Background traffic such as heartbeats
    Low,
}

impl Priority {
    /// Two-bit wire code
    pub fn code(self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }

    /// Parse a wire code
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Priority::Critical),
            1 => Ok(Priority::High),
            2 => Ok(Priority::Medium),
            3 => Ok(Priority::Low),
            other => Err(CoreError::InvalidPriority(other.to_string())),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Critical => write!(f, "critical"),
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

impl FromStr for Priority {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            _ => Err(CoreError::InvalidPriority(s.to_string())),
        }
    }
}

/// Decoded incident payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentBinaryPayload {
    /// Payload version
    pub version: u8,
    /// Priority carried in the flag bits
    pub priority: Priority,
    /// Latitude in 1e-7 degrees
    pub latitude_e7: i32,
    /// Longitude in 1e-7 degrees
    pub longitude_e7: i32,
    /// Altitude in whole meters
    pub altitude_m: i16,
    /// Reporting device hardware address
    pub device_mac: [u8; 6],
    /// Description, possibly truncated
    pub description: String,
    /// Optional still image
    pub image: Option<Vec<u8>>,
    /// Optional audio clip
    pub audio: Option<Vec<u8>>,
}

impl IncidentBinaryPayload {
    /// Latitude in degrees
    pub fn latitude(&self) -> f64 {
        e7_to_degrees(self.latitude_e7)
    }

    /// Longitude in degrees
    pub fn longitude(&self) -> f64 {
        e7_to_degrees(self.longitude_e7)
    }

    /// Whether an image is attached
    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }

    /// Whether an audio clip is attached
    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// Device MAC as colon-separated lowercase hex
    pub fn device_mac_string(&self) -> String {
        self.device_mac
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// Encoder/decoder for [`IncidentBinaryPayload`]
pub struct BinaryIncidentCodec;

impl BinaryIncidentCodec {
    /// Encode an incident without audio
    pub fn encode(
        description: &str,
        location: Location,
        device_mac: [u8; 6],
        priority: Priority,
        image: Option<&[u8]>,
    ) -> Result<Bytes> {
        Self::encode_with_audio(description, location, device_mac, priority, image, None)
    }

    /// Encode an incident with optional image and audio attachments
    pub fn encode_with_audio(
        description: &str,
        location: Location,
        device_mac: [u8; 6],
        priority: Priority,
        image: Option<&[u8]>,
        audio: Option<&[u8]>,
    ) -> Result<Bytes> {
        if let Some(image) = image {
            if image.len() > MAX_IMAGE_BYTES {
                return Err(CoreError::PayloadTooLarge {
                    field: "image",
                    size: image.len(),
                    max: MAX_IMAGE_BYTES,
                });
            }
        }
        if let Some(audio) = audio {
            if audio.len() > u32::MAX as usize {
                return Err(CoreError::PayloadTooLarge {
                    field: "audio",
                    size: audio.len(),
                    max: u32::MAX as usize,
                });
            }
        }

        let desc = truncate_bytes(description.as_bytes(), MAX_DESCRIPTION_BYTES);

        let mut flags = priority.code() << PRIORITY_SHIFT;
        if image.is_some() {
            flags |= FLAG_IMAGE;
        }
        if audio.is_some() {
            flags |= FLAG_AUDIO;
        }

        let capacity = INCIDENT_HEADER_SIZE
            + desc.len()
            + image.map_or(0, |i| 2 + i.len())
            + audio.map_or(0, |a| 4 + a.len());
        let mut buf = BytesMut::with_capacity(capacity);

        buf.put_u8(INCIDENT_PAYLOAD_VERSION);
        buf.put_u8(flags);
        buf.put_i32_le(location.latitude_e7());
        buf.put_i32_le(location.longitude_e7());
        buf.put_i16_le(location.altitude_m());
        buf.put_slice(&device_mac);
        buf.put_u8(desc.len() as u8);
        buf.put_slice(desc);

        if let Some(image) = image {
            buf.put_u16_le(image.len() as u16);
            buf.put_slice(image);
        }
        if let Some(audio) = audio {
            buf.put_u32_le(audio.len() as u32);
            buf.put_slice(audio);
        }

        Ok(buf.freeze())
    }

    /// Decode a payload, failing if any declared length overruns the buffer
    pub fn decode(data: &[u8]) -> Result<IncidentBinaryPayload> {
        if data.len() < INCIDENT_HEADER_SIZE {
            return Err(CoreError::Malformed(format!(
                "incident header needs {} bytes, got {}",
                INCIDENT_HEADER_SIZE,
                data.len()
            )));
        }

        let mut buf = data;
        let version = buf.get_u8();
        if version != INCIDENT_PAYLOAD_VERSION {
            return Err(CoreError::UnsupportedVersion(version));
        }
        let flags = buf.get_u8();
        let priority = Priority::from_code((flags >> PRIORITY_SHIFT) & PRIORITY_MASK)?;
        let latitude_e7 = buf.get_i32_le();
        let longitude_e7 = buf.get_i32_le();
        let altitude_m = buf.get_i16_le();
        let mut device_mac = [0u8; 6];
        buf.copy_to_slice(&mut device_mac);

        let desc_len = buf.get_u8() as usize;
        let description = take(&mut buf, desc_len, "description")?;
        let description = String::from_utf8_lossy(description).into_owned();

        let image = if flags & FLAG_IMAGE != 0 {
            if buf.remaining() < 2 {
                return Err(CoreError::Malformed("missing image length".into()));
            }
            let len = buf.get_u16_le() as usize;
            Some(take(&mut buf, len, "image")?.to_vec())
        } else {
            None
        };

        let audio = if flags & FLAG_AUDIO != 0 {
            if buf.remaining() < 4 {
                return Err(CoreError::Malformed("missing audio length".into()));
            }
            let len = buf.get_u32_le() as usize;
            Some(take(&mut buf, len, "audio")?.to_vec())
        } else {
            None
        };

        Ok(IncidentBinaryPayload {
            version,
            priority,
            latitude_e7,
            longitude_e7,
            altitude_m,
            device_mac,
            description,
            image,
            audio,
        })
    }
}

fn truncate_bytes(data: &[u8], max: usize) -> &[u8] {
    &data[..data.len().min(max)]
}

fn take<'a>(buf: &mut &'a [u8], len: usize, field: &str) -> Result<&'a [u8]> {
    if buf.len() < len {
        return Err(CoreError::Malformed(format!(
            "{} declares {} bytes, {} remain",
            field,
            len,
            buf.len()
        )));
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}
