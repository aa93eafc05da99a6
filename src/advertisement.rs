//! Raw advertisement frames as handed over by the scanner backends.
//!
//! A [`RawFrame`] is what the decoders see: the device address, the received
//! signal strength and the parsed advertising data. UUIDs are kept in the
//! short lowercase form BLE stacks use when talking to applications
//! (`"feaa"` for the Eddystone service), so decoders can compare against
//! plain string constants.

use crate::mac_address::MacAddress;

/// Bluetooth base UUID (`00000000-0000-1000-8000-00805F9B34FB`) with the
/// 32-bit alias bits cleared.
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;
const ALIAS_MASK: u128 = (1 << 96) - 1;

// AD types
const AD_UUID16_INCOMPLETE: u8 = 0x02;
const AD_UUID16_COMPLETE: u8 = 0x03;
const AD_UUID32_INCOMPLETE: u8 = 0x04;
const AD_UUID32_COMPLETE: u8 = 0x05;
const AD_UUID128_INCOMPLETE: u8 = 0x06;
const AD_UUID128_COMPLETE: u8 = 0x07;
const AD_NAME_SHORT: u8 = 0x08;
const AD_NAME_COMPLETE: u8 = 0x09;
const AD_SERVICE_DATA16: u8 = 0x16;
const AD_MANUFACTURER_DATA: u8 = 0xFF;

/// One advertisement event for one device.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawFrame {
    pub address: MacAddress,
    /// Received signal strength in dBm, when the backend reported one.
    pub rssi: Option<i16>,
    pub advertisement: Advertisement,
}

/// Service data block keyed by its service UUID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceData {
    pub uuid: String,
    pub data: Vec<u8>,
}

/// Parsed advertising data.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Advertisement {
    /// Advertised service UUIDs.
    pub service_uuids: Vec<String>,
    /// Service data blocks in the order they were received.
    pub service_data: Vec<ServiceData>,
    /// Manufacturer specific data, including the little-endian company id.
    pub manufacturer_data: Option<Vec<u8>>,
    pub local_name: Option<String>,
}

impl Advertisement {
    pub fn has_service(&self, uuid: &str) -> bool {
        self.service_uuids.iter().any(|u| u == uuid)
    }
}

/// Render a 16-bit SIG UUID.
pub fn short_uuid(uuid: u16) -> String {
    format!("{uuid:04x}")
}

/// Render a 128-bit UUID, shortening aliases of the Bluetooth base UUID.
///
/// # Examples
/// ```
/// use beacon_reporter::advertisement::uuid_string;
///
/// assert_eq!(uuid_string(0x0000_feaa_0000_1000_8000_0080_5f9b_34fb), "feaa");
/// assert_eq!(
///     uuid_string(0xf782_6da6_4fa2_4e98_8024_bc5b_71e0_893e),
///     "f7826da64fa24e988024bc5b71e0893e"
/// );
/// ```
pub fn uuid_string(uuid: u128) -> String {
    if uuid & ALIAS_MASK == BLUETOOTH_BASE_UUID {
        let alias = (uuid >> 96) as u32;
        if let Ok(short) = u16::try_from(alias) {
            return short_uuid(short);
        }
        return format!("{alias:08x}");
    }
    format!("{uuid:032x}")
}

/// Parse the AD structures of a raw advertising (or scan response) payload.
///
/// Truncated structures end parsing; whatever was collected before them is
/// kept.
pub fn parse_ad_structures(data: &[u8]) -> Advertisement {
    let mut advertisement = Advertisement::default();
    let mut rest = data;

    while let Some((&len, tail)) = rest.split_first() {
        let len = len as usize;
        if len == 0 || tail.len() < len {
            break;
        }
        let (structure, next) = tail.split_at(len);
        rest = next;

        let (ad_type, body) = (structure[0], &structure[1..]);
        match ad_type {
            AD_UUID16_INCOMPLETE | AD_UUID16_COMPLETE => advertisement.service_uuids.extend(
                body.chunks_exact(2)
                    .map(|c| short_uuid(u16::from_le_bytes([c[0], c[1]]))),
            ),
            AD_UUID32_INCOMPLETE | AD_UUID32_COMPLETE => advertisement.service_uuids.extend(
                body.chunks_exact(4).map(|c| {
                    let alias = u32::from_le_bytes([c[0], c[1], c[2], c[3]]);
                    uuid_string((u128::from(alias) << 96) | BLUETOOTH_BASE_UUID)
                }),
            ),
            AD_UUID128_INCOMPLETE | AD_UUID128_COMPLETE => {
                advertisement.service_uuids.extend(body.chunks_exact(16).map(|c| {
                    let mut bytes = [0u8; 16];
                    bytes.copy_from_slice(c);
                    uuid_string(u128::from_le_bytes(bytes))
                }))
            }
            AD_NAME_SHORT | AD_NAME_COMPLETE => {
                advertisement.local_name = Some(String::from_utf8_lossy(body).into_owned());
            }
            AD_SERVICE_DATA16 if body.len() >= 2 => {
                advertisement.service_data.push(ServiceData {
                    uuid: short_uuid(u16::from_le_bytes([body[0], body[1]])),
                    data: body[2..].to_vec(),
                });
            }
            AD_MANUFACTURER_DATA if body.len() >= 2 => {
                advertisement.manufacturer_data = Some(body.to_vec());
            }
            _ => {}
        }
    }

    advertisement
}
