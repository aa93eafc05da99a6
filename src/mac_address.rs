//! Device address type used as the report key.
//!
//! Both scanner backends hand out raw 6-byte addresses; reports and batches
//! render them as colon-separated uppercase hex.

use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A Bluetooth device address.
///
/// Ordering is byte-wise, which is also the order of the rendered strings,
/// so sorted key sets compare the same either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Errors returned when parsing an address string.
#[derive(Error, Debug, PartialEq)]
pub enum ParseMacError {
    #[error("invalid MAC address: expected 6 octets, got {0}")]
    InvalidLength(usize),
    #[error("invalid MAC address: octet {0} is not two hex digits")]
    InvalidOctet(usize),
}

impl FromStr for MacAddress {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let octets: Vec<&str> = s.split(':').collect();
        if octets.len() != 6 {
            return Err(ParseMacError::InvalidLength(octets.len()));
        }

        let mut bytes = [0u8; 6];
        for (i, octet) in octets.iter().enumerate() {
            if octet.len() != 2 {
                return Err(ParseMacError::InvalidOctet(i));
            }
            bytes[i] = u8::from_str_radix(octet, 16).map_err(|_| ParseMacError::InvalidOctet(i))?;
        }

        Ok(MacAddress(bytes))
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for MacAddress {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let addr = MacAddress([0xAA, 0xBB, 0xCC, 0x0D, 0xEE, 0x01]);
        assert_eq!(addr.to_string(), "AA:BB:CC:0D:EE:01");
    }

    #[test]
    fn test_from_str_round_trips_display() {
        let addr: MacAddress = "aa:bb:cc:0d:ee:01".parse().unwrap();
        assert_eq!(addr.0, [0xAA, 0xBB, 0xCC, 0x0D, 0xEE, 0x01]);
    }

    #[test]
    fn test_from_str_invalid() {
        assert_eq!(
            "AA:BB:CC".parse::<MacAddress>(),
            Err(ParseMacError::InvalidLength(3))
        );
        assert_eq!(
            "AA:BB:CC:DD:EE:GG".parse::<MacAddress>(),
            Err(ParseMacError::InvalidOctet(5))
        );
        assert_eq!(
            "AA:BB:CCC:DD:EE:FF".parse::<MacAddress>(),
            Err(ParseMacError::InvalidOctet(2))
        );
    }

    #[test]
    fn test_serializes_as_string() {
        let addr = MacAddress([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(
            serde_json::to_string(&addr).unwrap(),
            "\"00:11:22:33:44:55\""
        );
    }

    #[test]
    fn test_ordering_matches_rendered_order() {
        let low = MacAddress([0x0A, 0, 0, 0, 0, 0]);
        let high = MacAddress([0xA0, 0, 0, 0, 0, 0]);
        assert!(low < high);
        assert!(low.to_string() < high.to_string());
    }
}
