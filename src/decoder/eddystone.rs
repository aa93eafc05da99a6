//! Eddystone-URL frame expansion.
//!
//! See <https://github.com/google/eddystone/tree/master/eddystone-url>.

/// Eddystone service UUID as advertised.
pub const EDDYSTONE_SERVICE_UUID: &str = "feaa";

/// Frame type byte of an URL frame.
pub const FRAME_TYPE_URL: u8 = 0x10;

const URL_SCHEMES: [&str; 4] = ["http://www.", "https://www.", "http://", "https://"];

const URL_EXPANSIONS: [&str; 14] = [
    ".com/", ".org/", ".edu/", ".net/", ".info/", ".biz/", ".gov/", ".com", ".org", ".edu",
    ".net", ".info", ".biz", ".gov",
];

/// A decoded Eddystone-URL frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlFrame {
    /// Calibrated TX power at 0 m, in dBm.
    pub tx_power: i8,
    pub url: String,
}

/// Expand an Eddystone-URL service data frame.
///
/// Returns `None` for other frame types, frames shorter than four bytes and
/// unknown scheme prefixes. Reserved bytes in the encoded URL are skipped.
///
/// # Examples
/// ```
/// use beacon_reporter::decoder::eddystone::parse_url_frame;
///
/// let frame = [0x10, 0xF6, 0x00, b'r', b'u', b'u', b'v', b'i', 0x00];
/// assert_eq!(parse_url_frame(&frame).unwrap().url, "http://www.ruuvi.com/");
/// ```
pub fn parse_url_frame(frame: &[u8]) -> Option<UrlFrame> {
    if frame.len() < 4 || frame[0] != FRAME_TYPE_URL {
        return None;
    }
    let scheme = URL_SCHEMES.get(usize::from(frame[2]))?;

    let mut url = String::from(*scheme);
    for &byte in &frame[3..] {
        match byte {
            0x00..=0x0d => url.push_str(URL_EXPANSIONS[usize::from(byte)]),
            0x0e..=0x20 | 0x7f..=0xff => {}
            _ => url.push(char::from(byte)),
        }
    }

    Some(UrlFrame {
        tx_power: frame[1] as i8,
        url,
    })
}
