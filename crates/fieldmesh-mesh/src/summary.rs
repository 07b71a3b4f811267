//! Incident summary carried in a single INCIDENT envelope
//!
//! `lat f32 | lon f32 | alt f32 | description`, floats little-endian.
//! The description fills whatever remains of the envelope MTU and is cut by
//! byte count. Attachments do not travel on this path.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::envelope::MAX_ENVELOPE_PAYLOAD;
use crate::error::{MeshError, Result};

/// Bytes taken by the three coordinates
pub const SUMMARY_FIXED_SIZE: usize = 12;

/// Longest description that fits beside the coordinates
pub const MAX_SUMMARY_DESCRIPTION: usize = MAX_ENVELOPE_PAYLOAD - SUMMARY_FIXED_SIZE;

/// Position plus short description
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentSummary {
    /// Latitude in degrees
    pub latitude: f32,
    /// Longitude in degrees
    pub longitude: f32,
    /// Altitude in meters
    pub altitude: f32,
    /// Free text
    pub description: String,
}

impl IncidentSummary {
    /// Build a summary
    pub fn new(latitude: f32, longitude: f32, altitude: f32, description: impl Into<String>) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
            description: description.into(),
        }
    }

    /// Encode, truncating the description to fit one envelope
    pub fn encode(&self) -> Bytes {
        let desc = self.description.as_bytes();
        let desc = &desc[..desc.len().min(MAX_SUMMARY_DESCRIPTION)];

        let mut buf = BytesMut::with_capacity(SUMMARY_FIXED_SIZE + desc.len());
        buf.put_f32_le(self.latitude);
        buf.put_f32_le(self.longitude);
        buf.put_f32_le(self.altitude);
        buf.put_slice(desc);
        buf.freeze()
    }

    /// Decode an INCIDENT envelope payload
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < SUMMARY_FIXED_SIZE {
            return Err(MeshError::Malformed(format!(
                "incident summary too short: {} bytes",
                data.len()
            )));
        }
        let mut buf = data;
        let latitude = buf.get_f32_le();
        let longitude = buf.get_f32_le();
        let altitude = buf.get_f32_le();
        Ok(Self {
            latitude,
            longitude,
            altitude,
            description: String::from_utf8_lossy(buf).into_owned(),
        })
    }
}
