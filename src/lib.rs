//! `beacon-reporter` library.
//!
//! The binary (`src/main.rs`) is responsible for logging setup, signals and
//! process exit codes. The scan/decode/aggregate/publish loop lives in
//! [`crate::app`] where it can be tested deterministically with an injected
//! scanner and publisher.

pub mod advertisement;
pub mod aggregator;
pub mod app;
pub mod decoder;
pub mod location;
pub mod mac_address;
pub mod publish;
pub mod report;
pub mod scanner;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use advertisement::{Advertisement, RawFrame, ServiceData};
pub use aggregator::{Aggregator, Batch};
pub use decoder::{DecoderSet, decode};
pub use location::{Location, LocationProvider};
pub use mac_address::MacAddress;
pub use publish::{Delivery, PublishError, Publisher};
pub use report::{DeviceReport, ReportTable};
pub use scanner::{Backend, ScanError};
