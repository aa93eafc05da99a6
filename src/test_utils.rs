use crate::advertisement::{Advertisement, RawFrame, ServiceData};
use crate::decoder::eddystone::{EDDYSTONE_SERVICE_UUID, FRAME_TYPE_URL};
use crate::mac_address::MacAddress;

/// A stable MAC address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// Gateway host name stamped on test reports.
pub const TEST_HOST: &str = "gateway-1";

/// A proximity UUID that is not Kontakt's.
pub const OTHER_UUID: &str = "0123456789abcdef0123456789abcdef";

/// Ruuvi RAW (format 3) manufacturer data with known values.
pub fn ruuvi_raw_data() -> Vec<u8> {
    vec![
        0x99, 0x04, // Ruuvi company id
        0x03, // RAW format
        0x32, // humidity: 50 * 0.5 = 25.0 %
        0x19, 0x05, // temperature: 25.05 °C
        0x00, 0x00, // pressure: 0 + 50000 Pa
        0xFF, 0xFF, // acceleration X: -1 mG
        0x7F, 0xFF, // acceleration Y: 32767 mG
        0x80, 0x00, // acceleration Z: -32768 mG
        0x0B, 0xB8, // battery: 3000 mV
    ]
}

/// iBeacon layout manufacturer data.
pub fn beacon_data(mfg_id: u16, uuid: &str, major: u16, minor: u16) -> Vec<u8> {
    let mut data = mfg_id.to_le_bytes().to_vec();
    data.extend_from_slice(&[0x02, 0x15]);
    data.extend(hex::decode(uuid).unwrap());
    data.extend_from_slice(&major.to_be_bytes());
    data.extend_from_slice(&minor.to_be_bytes());
    data.push(0xC5); // measured power
    data
}

/// 13 bytes of GlobalStar manufacturer data.
pub fn globalstar_data() -> Vec<u8> {
    vec![
        0x76, 0x05, 0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF, 0x00, 0x11, 0x22,
    ]
}

/// An Eddystone advertisement whose URL frame is `https://` followed by
/// `encoded_url`.
pub fn eddystone_advertisement(encoded_url: &[u8]) -> Advertisement {
    let mut data = vec![FRAME_TYPE_URL, 0xF6, 0x03];
    data.extend_from_slice(encoded_url);
    Advertisement {
        service_uuids: vec![EDDYSTONE_SERVICE_UUID.to_string()],
        service_data: vec![ServiceData {
            uuid: EDDYSTONE_SERVICE_UUID.to_string(),
            data,
        }],
        ..Default::default()
    }
}

/// A frame from `address` carrying only manufacturer data.
pub fn frame_with_data(address: MacAddress, rssi: i16, data: Vec<u8>) -> RawFrame {
    RawFrame {
        address,
        rssi: Some(rssi),
        advertisement: Advertisement {
            manufacturer_data: Some(data),
            ..Default::default()
        },
    }
}
