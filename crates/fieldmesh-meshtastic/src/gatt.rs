//! Meshtastic GATT layout
//!
//! Service and characteristic UUIDs are fixed by the Meshtastic app
//! ecosystem and must not change.

use std::fmt;
use uuid::Uuid;

/// Meshtastic BLE service
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x6ba1b218_15a8_461f_9fa8_5dcae273eafd);

/// Companion writes `ToRadio` here
pub const TO_RADIO_UUID: Uuid = Uuid::from_u128(0xf75c76d2_129e_4dad_a1dd_7866124401e7);

/// Companion reads `FromRadio` here, never notified
pub const FROM_RADIO_UUID: Uuid = Uuid::from_u128(0x2c55e69e_4993_11ed_b878_0242ac120002);

/// Notify-only counter signalling unread `FromRadio` records
pub const FROM_NUM_UUID: Uuid = Uuid::from_u128(0xed9da18c_a800_4f66_a670_aa7547e34453);

/// MTU requested after connecting
pub const PREFERRED_MTU: u16 = 512;

/// The three characteristics of the Meshtastic service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    /// Command-in
    ToRadio,
    /// Response-out
    FromRadio,
    /// Counter-notify
    FromNum,
}

impl Characteristic {
    /// All three, in discovery order
    pub const ALL: [Characteristic; 3] = [
        Characteristic::ToRadio,
        Characteristic::FromRadio,
        Characteristic::FromNum,
    ];

    /// UUID of this characteristic
    pub fn uuid(self) -> Uuid {
        match self {
            Characteristic::ToRadio => TO_RADIO_UUID,
            Characteristic::FromRadio => FROM_RADIO_UUID,
            Characteristic::FromNum => FROM_NUM_UUID,
        }
    }

    /// Characteristic with this UUID, if it is one of ours
    pub fn from_uuid(uuid: &Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.uuid() == *uuid)
    }
}

impl fmt::Display for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Characteristic::ToRadio => write!(f, "ToRadio"),
            Characteristic::FromRadio => write!(f, "FromRadio"),
            Characteristic::FromNum => write!(f, "FromNum"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_strings() {
        assert_eq!(SERVICE_UUID.to_string(), "6ba1b218-15a8-461f-9fa8-5dcae273eafd");
        assert_eq!(TO_RADIO_UUID.to_string(), "f75c76d2-129e-4dad-a1dd-7866124401e7");
        assert_eq!(FROM_RADIO_UUID.to_string(), "2c55e69e-4993-11ed-b878-0242ac120002");
        assert_eq!(FROM_NUM_UUID.to_string(), "ed9da18c-a800-4f66-a670-aa7547e34453");
    }

    #[test]
    fn test_from_uuid() {
        assert_eq!(
            Characteristic::from_uuid(&FROM_NUM_UUID),
            Some(Characteristic::FromNum)
        );
        assert_eq!(Characteristic::from_uuid(&SERVICE_UUID), None);
    }
}
