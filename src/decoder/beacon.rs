//! Proximity beacon (iBeacon layout) decoding.
//!
//! Manufacturer data layout: company id (little-endian), beacon type,
//! remaining length, 16-byte proximity UUID, major and minor (big-endian).

use crate::advertisement::Advertisement;
use regex::Regex;
use serde::Serialize;

/// Company id Kontakt.io beacons advertise with (Apple's iBeacon id).
pub const KONTAKT_MFG_ID: u16 = 0x004c;
/// Proximity UUID shared by all Kontakt.io beacons.
pub const KONTAKT_UUID: &str = "f7826da64fa24e988024bc5b71e0893e";

const MIN_BEACON_LEN: usize = 25;

/// A decoded proximity beacon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconRecord {
    pub mfg_id: u16,
    /// Proximity UUID as 32 lowercase hex digits.
    pub uuid: String,
    pub major: u16,
    pub minor: u16,
}

/// Which generic beacons to accept.
#[derive(Debug, Clone, Default)]
pub enum BeaconFilter {
    #[default]
    Disabled,
    /// Every well-formed beacon.
    Any,
    /// Only beacons with this proximity UUID (lowercase hex).
    Exact(String),
    /// Beacons whose proximity UUID contains a match of the pattern.
    Matching(Regex),
}

impl BeaconFilter {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, BeaconFilter::Disabled)
    }

    pub fn accepts(&self, uuid: &str) -> bool {
        match self {
            BeaconFilter::Disabled => false,
            BeaconFilter::Any => true,
            BeaconFilter::Exact(expected) => expected.eq_ignore_ascii_case(uuid),
            BeaconFilter::Matching(pattern) => pattern.is_match(uuid),
        }
    }
}

impl std::fmt::Display for BeaconFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BeaconFilter::Disabled => write!(f, "disabled"),
            BeaconFilter::Any => write!(f, "any"),
            BeaconFilter::Exact(uuid) => write!(f, "uuid {uuid}"),
            BeaconFilter::Matching(pattern) => write!(f, "matching /{pattern}/"),
        }
    }
}

/// Parse the `--ibeacon` value.
///
/// An empty value enables every beacon, 32 hex digits select one proximity
/// UUID and anything else is compiled as a regular expression.
///
/// # Examples
/// ```
/// use beacon_reporter::decoder::beacon::{BeaconFilter, parse_beacon_filter};
///
/// assert!(matches!(parse_beacon_filter("").unwrap(), BeaconFilter::Any));
/// assert!(matches!(
///     parse_beacon_filter("F7826DA64FA24E988024BC5B71E0893E").unwrap(),
///     BeaconFilter::Exact(_)
/// ));
/// assert!(matches!(parse_beacon_filter("^f782").unwrap(), BeaconFilter::Matching(_)));
/// assert!(parse_beacon_filter("(").is_err());
/// ```
pub fn parse_beacon_filter(src: &str) -> Result<BeaconFilter, String> {
    let src = src.trim();
    if src.is_empty() {
        return Ok(BeaconFilter::Any);
    }
    if src.len() == 32 && src.chars().all(|c| c.is_ascii_hexdigit()) {
        return Ok(BeaconFilter::Exact(src.to_ascii_lowercase()));
    }
    Regex::new(src)
        .map(BeaconFilter::Matching)
        .map_err(|e| format!("invalid beacon pattern '{src}': {e}"))
}

/// Decode the iBeacon layout from raw manufacturer data.
///
/// Requires at least 25 bytes and a remaining-length byte that matches the
/// actual length.
pub fn parse_beacon(data: &[u8]) -> Option<BeaconRecord> {
    if data.len() < MIN_BEACON_LEN || usize::from(data[3]) != data.len() - 4 {
        return None;
    }

    Some(BeaconRecord {
        mfg_id: u16::from_le_bytes([data[0], data[1]]),
        uuid: hex::encode(&data[4..20]),
        major: u16::from_be_bytes([data[20], data[21]]),
        minor: u16::from_be_bytes([data[22], data[23]]),
    })
}

/// Kontakt.io beacons: Apple company id and the Kontakt proximity UUID.
pub fn decode_kontakt(advertisement: &Advertisement) -> Option<BeaconRecord> {
    let beacon = parse_beacon(advertisement.manufacturer_data.as_deref()?)?;
    (beacon.mfg_id == KONTAKT_MFG_ID && beacon.uuid == KONTAKT_UUID).then_some(beacon)
}

/// Any beacon accepted by `filter`.
pub fn decode_ibeacon(advertisement: &Advertisement, filter: &BeaconFilter) -> Option<BeaconRecord> {
    let beacon = parse_beacon(advertisement.manufacturer_data.as_deref()?)?;
    filter.accepts(&beacon.uuid).then_some(beacon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{OTHER_UUID, beacon_data};

    fn advertisement(data: Vec<u8>) -> Advertisement {
        Advertisement {
            manufacturer_data: Some(data),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_beacon_fields() {
        let beacon = parse_beacon(&beacon_data(KONTAKT_MFG_ID, KONTAKT_UUID, 0x0102, 0xFFFE)).unwrap();
        assert_eq!(beacon.mfg_id, 0x004c);
        assert_eq!(beacon.uuid, KONTAKT_UUID);
        assert_eq!(beacon.major, 0x0102);
        assert_eq!(beacon.minor, 0xFFFE);
    }

    #[test]
    fn test_parse_beacon_length_checks() {
        let mut data = beacon_data(KONTAKT_MFG_ID, KONTAKT_UUID, 1, 2);
        data[3] = 0x14;
        assert!(parse_beacon(&data).is_none(), "declared length mismatch");

        let data = beacon_data(KONTAKT_MFG_ID, KONTAKT_UUID, 1, 2);
        assert!(parse_beacon(&data[..24]).is_none(), "too short");

        let mut longer = beacon_data(KONTAKT_MFG_ID, KONTAKT_UUID, 1, 2);
        longer.push(0xAB);
        longer[3] = 0x16;
        assert!(parse_beacon(&longer).is_some());
    }

    #[test]
    fn test_kontakt_requires_vendor_and_uuid() {
        let adv = advertisement(beacon_data(KONTAKT_MFG_ID, KONTAKT_UUID, 1, 2));
        assert!(decode_kontakt(&adv).is_some());

        let adv = advertisement(beacon_data(KONTAKT_MFG_ID, OTHER_UUID, 1, 2));
        assert!(decode_kontakt(&adv).is_none());

        let adv = advertisement(beacon_data(0x0059, KONTAKT_UUID, 1, 2));
        assert!(decode_kontakt(&adv).is_none());
    }

    #[test]
    fn test_ibeacon_filters() {
        let adv = advertisement(beacon_data(0x0059, OTHER_UUID, 1, 2));

        assert!(decode_ibeacon(&adv, &BeaconFilter::Any).is_some());
        assert!(decode_ibeacon(&adv, &BeaconFilter::Disabled).is_none());
        assert!(decode_ibeacon(&adv, &parse_beacon_filter(&OTHER_UUID.to_uppercase()).unwrap()).is_some());
        assert!(decode_ibeacon(&adv, &parse_beacon_filter(KONTAKT_UUID).unwrap()).is_none());
        assert!(decode_ibeacon(&adv, &parse_beacon_filter("^0123").unwrap()).is_some());
        assert!(decode_ibeacon(&adv, &parse_beacon_filter("^f782").unwrap()).is_none());
    }

    #[test]
    fn test_ibeacon_needs_manufacturer_data() {
        assert!(decode_ibeacon(&Advertisement::default(), &BeaconFilter::Any).is_none());
    }

    #[test]
    fn test_filter_display() {
        assert_eq!(BeaconFilter::Any.to_string(), "any");
        assert_eq!(
            parse_beacon_filter("ab.*").unwrap().to_string(),
            "matching /ab.*/"
        );
    }
}
