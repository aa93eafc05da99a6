//! RuuviTag payload decoding for the legacy data formats 3 (RAW) and
//! 4 (Eddystone-URL).
//!
//! See <https://github.com/ruuvi/ruuvi-sensor-protocols>.

use super::eddystone::{EDDYSTONE_SERVICE_UUID, parse_url_frame};
use crate::advertisement::Advertisement;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::{Engine, alphabet};
use serde::{Serialize, Serializer};

/// Format byte of the RAW (format 3) manufacturer data payload.
pub const FORMAT_RAW: u8 = 0x03;
/// Format byte of the base64 body behind the Ruuvi URL.
pub const FORMAT_URL: u8 = 0x04;
/// URL prefix the format 4 body is appended to.
pub const RUUVI_URL_PREFIX: &str = "https://ruu.vi/#";

/// Company id, format byte and 13 payload bytes.
const RAW_DATA_LEN: usize = 16;
const PRESSURE_OFFSET: u32 = 50_000;

/// Base64 as produced by Ruuvi firmware: padding never required, trailing
/// bits ignored.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::RequireNone),
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Raw,
    Url,
}

impl DataFormat {
    pub fn code(self) -> u8 {
        match self {
            DataFormat::Raw => FORMAT_RAW,
            DataFormat::Url => FORMAT_URL,
        }
    }
}

impl Serialize for DataFormat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

/// Decoded RuuviTag sensor values.
///
/// Acceleration (milli-g) and battery voltage (millivolts) are only present
/// in the RAW format.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorRecord {
    pub data_format: DataFormat,
    /// Degrees Celsius, two decimals.
    pub temperature: f64,
    /// Relative humidity in percent.
    pub humidity: f64,
    /// Pascals.
    pub pressure: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceleration_x: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceleration_y: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceleration_z: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery: Option<u16>,
}

/// Decode whichever Ruuvi format the advertisement carries, trying the
/// Eddystone-URL form first.
pub fn decode(advertisement: &Advertisement) -> Option<SensorRecord> {
    decode_url(advertisement).or_else(|| decode_raw(advertisement))
}

/// Decode a RAW (format 3) payload from the manufacturer data.
///
/// The company id is not checked, only the format byte at offset 2.
pub fn decode_raw(advertisement: &Advertisement) -> Option<SensorRecord> {
    let data = advertisement.manufacturer_data.as_deref()?;
    if data.len() < RAW_DATA_LEN || data[2] != FORMAT_RAW {
        return None;
    }

    let be_u16 = |at: usize| u16::from_be_bytes([data[at], data[at + 1]]);
    let be_i16 = |at: usize| i32::from(i16::from_be_bytes([data[at], data[at + 1]]));

    Some(SensorRecord {
        data_format: DataFormat::Raw,
        humidity: humidity(data[3]),
        temperature: temperature(data[4], data[5]),
        pressure: u32::from(be_u16(6)) + PRESSURE_OFFSET,
        acceleration_x: Some(be_i16(8)),
        acceleration_y: Some(be_i16(10)),
        acceleration_z: Some(be_i16(12)),
        battery: Some(be_u16(14)),
    })
}

/// Decode the format 4 body from an Eddystone-URL frame pointing at
/// [`RUUVI_URL_PREFIX`].
///
/// Only the first service data block is considered, and the Eddystone
/// service must also be listed among the advertised services.
pub fn decode_url(advertisement: &Advertisement) -> Option<SensorRecord> {
    if !advertisement.has_service(EDDYSTONE_SERVICE_UUID) {
        return None;
    }
    let service = advertisement.service_data.first()?;
    if service.uuid != EDDYSTONE_SERVICE_UUID {
        return None;
    }

    let frame = parse_url_frame(&service.data)?;
    let encoded = frame.url.strip_prefix(RUUVI_URL_PREFIX)?;
    let body = decode_base64(encoded)?;

    let &[format, raw_humidity, whole, fraction, pressure_hi, pressure_lo] = body.as_slice() else {
        return None;
    };
    if format != FORMAT_URL {
        return None;
    }

    Some(SensorRecord {
        data_format: DataFormat::Url,
        humidity: humidity(raw_humidity),
        temperature: temperature(whole, fraction),
        pressure: u32::from(u16::from_be_bytes([pressure_hi, pressure_lo])) + PRESSURE_OFFSET,
        acceleration_x: None,
        acceleration_y: None,
        acceleration_z: None,
        battery: None,
    })
}

fn humidity(raw: u8) -> f64 {
    f64::from(raw) * 0.5
}

/// Whole degrees plus hundredths; values above 128 carry the sign bit.
fn temperature(whole: u8, fraction: u8) -> f64 {
    let mut celsius = f64::from(whole) + f64::from(fraction) / 100.0;
    if celsius > 128.0 {
        celsius = -(celsius - 128.0);
    }
    (celsius * 100.0).round() / 100.0
}

/// Accepts both base64 alphabets, stops at padding, skips stray characters
/// and drops a dangling final sextet (the format 4 URL carries one extra
/// character for the tag id).
fn decode_base64(encoded: &str) -> Option<Vec<u8>> {
    let mut normalized: String = encoded
        .chars()
        .take_while(|&c| c != '=')
        .filter_map(|c| match c {
            '-' => Some('+'),
            '_' => Some('/'),
            c if c.is_ascii_alphanumeric() || c == '+' || c == '/' => Some(c),
            _ => None,
        })
        .collect();
    if normalized.len() % 4 == 1 {
        normalized.pop();
    }
    LENIENT_BASE64.decode(normalized).ok()
}
