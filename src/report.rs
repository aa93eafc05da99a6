//! Device reports and the per-interval report table.

use crate::decoder::beacon::BeaconRecord;
use crate::decoder::ruuvi::SensorRecord;
use crate::mac_address::MacAddress;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::time::SystemTime;

/// Milliseconds since the Unix epoch, saturating at zero for clocks set
/// before 1970.
pub fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The latest observation of one device.
///
/// Which of the optional fields are set depends on the decoder that
/// produced the report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceReport {
    pub mac_address: MacAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i16>,
    /// Epoch milliseconds of the observation.
    pub detected_at: u64,
    /// Host name of the gateway that saw the device.
    pub detected_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_hex"
    )]
    pub manufacturer_data: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beacon: Option<BeaconRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ruuvi: Option<SensorRecord>,
}

fn serialize_hex<S: Serializer>(data: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
    match data {
        Some(bytes) => serializer.serialize_str(&hex::encode(bytes)),
        None => serializer.serialize_none(),
    }
}

impl DeviceReport {
    /// A report carrying only identity, signal strength and detection stamp.
    pub fn new(mac_address: MacAddress, rssi: Option<i16>, detected_at: u64, detected_by: &str) -> Self {
        Self {
            mac_address,
            rssi,
            detected_at,
            detected_by: detected_by.to_string(),
            name: None,
            manufacturer_data: None,
            beacon: None,
            ruuvi: None,
        }
    }

    /// Reports from streaming sensors replace older readings instead of
    /// being merged into them.
    pub fn is_sensor_reading(&self) -> bool {
        self.ruuvi.is_some()
    }

    /// Merge a newer observation of the same device into this one.
    ///
    /// `rssi` and `detected_at` follow the newer report; every other field is
    /// only filled in when it is still empty.
    pub fn merge(&mut self, newer: DeviceReport) {
        if newer.rssi.is_some() {
            self.rssi = newer.rssi;
        }
        self.detected_at = newer.detected_at;

        fill(&mut self.name, newer.name);
        fill(&mut self.manufacturer_data, newer.manufacturer_data);
        fill(&mut self.beacon, newer.beacon);
        fill(&mut self.ruuvi, newer.ruuvi);
    }
}

fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}

/// Reports accumulated during one publish interval, one per device.
#[derive(Debug, Default, Clone)]
pub struct ReportTable {
    reports: HashMap<MacAddress, DeviceReport>,
}

impl ReportTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a report.
    ///
    /// A report for an unseen device, or any report when `force_overwrite`
    /// is set, replaces the entry wholesale. Otherwise it is merged into the
    /// existing entry with [`DeviceReport::merge`].
    pub fn put(&mut self, report: DeviceReport, force_overwrite: bool) {
        if !force_overwrite
            && let Some(existing) = self.reports.get_mut(&report.mac_address)
        {
            existing.merge(report);
            return;
        }
        self.reports.insert(report.mac_address, report);
    }

    #[cfg(test)]
    pub fn get(&self, mac: &MacAddress) -> Option<&DeviceReport> {
        self.reports.get(mac)
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// Device addresses in ascending order.
    pub fn sorted_keys(&self) -> Vec<MacAddress> {
        let mut keys: Vec<MacAddress> = self.reports.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Take all reports out, ordered by address, leaving the table empty.
    pub fn drain(&mut self) -> Vec<DeviceReport> {
        let mut reports: Vec<DeviceReport> = self.reports.drain().map(|(_, r)| r).collect();
        reports.sort_unstable_by_key(|r| r.mac_address);
        reports
    }

    pub fn clear(&mut self) {
        self.reports.clear();
    }
}
