//! Per-interval report aggregation and change detection.
//!
//! The [`Aggregator`] owns the live report table, the device set of the
//! last emitted batch and whether any batch was ever delivered. It is driven
//! from a single task: reports go in through [`Aggregator::accumulate`], each
//! timer tick calls [`Aggregator::drain_if_changed`], and the outcome of the
//! publish is fed back with [`Aggregator::publish_succeeded`] or
//! [`Aggregator::publish_failed`].

use crate::location::Location;
use crate::mac_address::MacAddress;
use crate::report::{DeviceReport, ReportTable};
use serde::Serialize;
use tracing::debug;

/// One publish interval's worth of reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub tags: Vec<DeviceReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    /// Epoch milliseconds when the batch was assembled.
    pub detected_at: u64,
    pub detected_by: String,
}

#[derive(Debug)]
pub struct Aggregator {
    live: ReportTable,
    /// Sorted device set of the last emitted batch; `None` forces the next
    /// tick to emit.
    previous: Option<Vec<MacAddress>>,
    has_published: bool,
    publish_all: bool,
    detected_by: String,
}

impl Aggregator {
    /// `publish_all` emits on every tick regardless of changes.
    pub fn new(detected_by: impl Into<String>, publish_all: bool) -> Self {
        Self {
            live: ReportTable::new(),
            previous: None,
            has_published: false,
            publish_all,
            detected_by: detected_by.into(),
        }
    }

    /// Add a decoded report to the current interval. Sensor readings replace
    /// the stored report, everything else is merged into it.
    pub fn accumulate(&mut self, report: DeviceReport) {
        let force_overwrite = report.is_sensor_reading();
        self.live.put(report, force_overwrite);
    }

    #[cfg(test)]
    pub fn live(&self) -> &ReportTable {
        &self.live
    }

    pub fn has_published(&self) -> bool {
        self.has_published
    }

    /// Whether the current interval warrants a batch.
    ///
    /// Only the set of devices is compared with the last batch, not their
    /// values.
    pub fn should_emit(&self) -> bool {
        if self.publish_all || !self.has_published {
            return true;
        }
        match &self.previous {
            None => true,
            Some(previous) => *previous != self.live.sorted_keys(),
        }
    }

    /// End the current interval.
    ///
    /// Returns the batch to publish when [`Self::should_emit`] holds. The
    /// live table is emptied either way.
    pub fn drain_if_changed(&mut self, location: Option<Location>, now_ms: u64) -> Option<Batch> {
        if !self.should_emit() {
            debug!(devices = self.live.len(), "device set unchanged");
            self.live.clear();
            return None;
        }

        self.previous = Some(self.live.sorted_keys());
        Some(Batch {
            tags: self.live.drain(),
            location,
            detected_at: now_ms,
            detected_by: self.detected_by.clone(),
        })
    }

    pub fn publish_succeeded(&mut self) {
        self.has_published = true;
    }

    /// Forget the last emitted device set so the next tick emits.
    pub fn publish_failed(&mut self) {
        self.previous = None;
    }
}
