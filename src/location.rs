//! Gateway location attached to each published batch.

use serde::{Serialize, Serializer};
use std::fmt;

/// Position state of the gateway.
///
/// `Searching` and `Unavailable` are reported by receiver-backed
/// [`LocationProvider`] implementations that plug into the run loop;
/// [`FixedLocation`] always carries a `Fix`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Location {
    Fix { latitude: f64, longitude: f64 },
    /// A receiver is attached but has no fix yet.
    Searching,
    /// Location was requested but no receiver is available.
    Unavailable,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Fix {
                latitude,
                longitude,
            } => write!(f, "{latitude},{longitude}"),
            Location::Searching => write!(f, "searching"),
            Location::Unavailable => write!(f, "n/a"),
        }
    }
}

impl Serialize for Location {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Source of the gateway position, queried once per publish interval.
pub trait LocationProvider: Send + Sync {
    /// `None` when location tagging is not configured at all.
    fn location(&self) -> Option<Location>;
}

/// No location tagging; batches go out without a `location` field.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLocation;

impl LocationProvider for NoLocation {
    fn location(&self) -> Option<Location> {
        None
    }
}

/// A gateway with a fixed, known position.
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation(pub Location);

impl LocationProvider for FixedLocation {
    fn location(&self) -> Option<Location> {
        Some(self.0)
    }
}

/// Parse a `LAT,LON` pair.
///
/// # Examples
/// ```
/// use beacon_reporter::location::{Location, parse_location};
///
/// assert_eq!(
///     parse_location("60.17,24.94").unwrap(),
///     Location::Fix { latitude: 60.17, longitude: 24.94 }
/// );
/// ```
pub fn parse_location(src: &str) -> Result<Location, String> {
    let (lat, lon) = src
        .split_once(',')
        .ok_or_else(|| "invalid location: expected format LAT,LON".to_string())?;
    let latitude: f64 = lat
        .trim()
        .parse()
        .map_err(|_| format!("invalid latitude: {lat}"))?;
    let longitude: f64 = lon
        .trim()
        .parse()
        .map_err(|_| format!("invalid longitude: {lon}"))?;

    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(format!("location out of range: {src}"));
    }
    Ok(Location::Fix {
        latitude,
        longitude,
    })
}
