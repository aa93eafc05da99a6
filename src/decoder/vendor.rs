//! Identity-only decoders: GlobalStar trackers and the basic BLE fallback.

use crate::advertisement::RawFrame;

/// GlobalStar company id.
pub const GLOBALSTAR_MFG_ID: u16 = 0x0576;
const GLOBALSTAR_DATA_LEN: usize = 13;

/// What the identity decoders extract from a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub rssi: i16,
    pub name: Option<String>,
    pub manufacturer_data: Option<Vec<u8>>,
}

/// GlobalStar devices: a named device with signal strength and exactly 13
/// bytes of GlobalStar manufacturer data. The payload itself is kept opaque.
pub fn decode_globalstar(frame: &RawFrame) -> Option<Identity> {
    let rssi = frame.rssi?;
    let adv = &frame.advertisement;
    let name = adv.local_name.as_ref()?;
    let data = adv.manufacturer_data.as_ref()?;

    if data.len() != GLOBALSTAR_DATA_LEN || u16::from_le_bytes([data[0], data[1]]) != GLOBALSTAR_MFG_ID {
        return None;
    }

    Some(Identity {
        rssi,
        name: Some(name.clone()),
        manufacturer_data: Some(data.clone()),
    })
}

/// Any frame with a signal strength, carrying along name and manufacturer
/// data when advertised.
pub fn decode_basic(frame: &RawFrame) -> Option<Identity> {
    Some(Identity {
        rssi: frame.rssi?,
        name: frame.advertisement.local_name.clone(),
        manufacturer_data: frame.advertisement.manufacturer_data.clone(),
    })
}
