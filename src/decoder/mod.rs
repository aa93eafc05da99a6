//! Advertisement decoders and the dispatcher that picks one per frame.
//!
//! Decoders are pure functions of the frame: they either return a typed
//! record or `None`. Malformed input is never an error, it simply does not
//! match.

pub mod beacon;
pub mod eddystone;
pub mod ruuvi;
pub mod vendor;

use crate::advertisement::RawFrame;
use crate::report::DeviceReport;
use beacon::BeaconFilter;
use vendor::Identity;

/// Which decoders are enabled.
#[derive(Debug, Clone, Default)]
pub struct DecoderSet {
    pub kontakt: bool,
    pub ibeacon: BeaconFilter,
    pub globalstar: bool,
    pub ruuvi: bool,
    pub basic: bool,
}

impl DecoderSet {
    /// Every decoder, with generic beacons unfiltered.
    pub fn all() -> Self {
        Self {
            kontakt: true,
            ibeacon: BeaconFilter::Any,
            globalstar: true,
            ruuvi: true,
            basic: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.kontakt || self.ibeacon.is_enabled() || self.globalstar || self.ruuvi || self.basic)
    }
}

/// Decode one frame into a report.
///
/// Decoders are tried in a fixed order: Kontakt, generic iBeacon,
/// GlobalStar, Ruuvi, basic BLE. The first match wins; disabled decoders are
/// not run at all. With `basic` enabled every frame that has a signal
/// strength produces a report.
pub fn decode(
    frame: &RawFrame,
    decoders: &DecoderSet,
    detected_by: &str,
    detected_at: u64,
) -> Option<DeviceReport> {
    let adv = &frame.advertisement;
    let base = || DeviceReport::new(frame.address, frame.rssi, detected_at, detected_by);

    if decoders.kontakt
        && let Some(record) = beacon::decode_kontakt(adv)
    {
        return Some(DeviceReport {
            beacon: Some(record),
            ..base()
        });
    }

    if decoders.ibeacon.is_enabled()
        && let Some(record) = beacon::decode_ibeacon(adv, &decoders.ibeacon)
    {
        return Some(DeviceReport {
            beacon: Some(record),
            ..base()
        });
    }

    if decoders.globalstar
        && let Some(identity) = vendor::decode_globalstar(frame)
    {
        return Some(with_identity(base(), identity));
    }

    if decoders.ruuvi
        && let Some(record) = ruuvi::decode(adv)
    {
        return Some(DeviceReport {
            ruuvi: Some(record),
            ..base()
        });
    }

    if decoders.basic
        && let Some(identity) = vendor::decode_basic(frame)
    {
        return Some(with_identity(base(), identity));
    }

    None
}

fn with_identity(report: DeviceReport, identity: Identity) -> DeviceReport {
    DeviceReport {
        rssi: Some(identity.rssi),
        name: identity.name,
        manufacturer_data: identity.manufacturer_data,
        ..report
    }
}
