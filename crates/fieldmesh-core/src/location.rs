//! Geographic location and its fixed-point wire representation
//!
//! Coordinates travel as signed 32-bit integers in units of 1e-7 degrees
//! and altitude as whole meters in a signed 16-bit field.

use serde::{Deserialize, Serialize};

/// Scale between degrees and the 1e-7 degree wire unit
pub const COORD_SCALE: f64 = 1e7;

/// Geographic location reported with an incident
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in degrees (-90 to 90)
    pub latitude: f64,
    /// Longitude in degrees (-180 to 180)
    pub longitude: f64,
    /// Altitude in meters
    pub altitude: f64,
}

impl Location {
    /// Create a new location
    pub fn new(latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
        }
    }

    /// Latitude in 1e-7 degree units
    pub fn latitude_e7(&self) -> i32 {
        degrees_to_e7(self.latitude)
    }

    /// Longitude in 1e-7 degree units
    pub fn longitude_e7(&self) -> i32 {
        degrees_to_e7(self.longitude)
    }

    /// Altitude as whole meters, clamped to the wire range
    pub fn altitude_m(&self) -> i16 {
        altitude_to_i16(self.altitude)
    }
}

/// Quantize degrees to 1e-7 units, rounding to nearest
pub fn degrees_to_e7(degrees: f64) -> i32 {
    // `as` saturates on overflow and maps NaN to 0
    (degrees * COORD_SCALE).round() as i32
}

/// Expand 1e-7 units back to degrees
pub fn e7_to_degrees(value: i32) -> f64 {
    value as f64 / COORD_SCALE
}

/// Truncate altitude toward zero and clamp to the i16 range
pub fn altitude_to_i16(meters: f64) -> i16 {
    meters.trunc().clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_quantization() {
        assert_eq!(degrees_to_e7(52.520008), 525_200_080);
        assert_eq!(degrees_to_e7(-13.404954), -134_049_540);
        assert!((e7_to_degrees(525_200_080) - 52.520008).abs() < 1e-7);
    }

    #[test]
    fn test_altitude_truncates_and_clamps() {
        assert_eq!(altitude_to_i16(34.5), 34);
        assert_eq!(altitude_to_i16(-2.9), -2);
        assert_eq!(altitude_to_i16(40_000.0), i16::MAX);
        assert_eq!(altitude_to_i16(-40_000.0), i16::MIN);
    }

    #[test]
    fn test_location_accessors() {
        let loc = Location::new(52.520008, 13.404954, 34.5);
        assert_eq!(loc.latitude_e7(), 525_200_080);
        assert_eq!(loc.longitude_e7(), 134_049_540);
        assert_eq!(loc.altitude_m(), 34);
    }
}
