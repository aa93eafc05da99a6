//! BLE scanner backends.
//!
//! Each backend turns advertisements from every nearby device into
//! [`RawFrame`]s on a channel. Decoding happens downstream.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use crate::advertisement::RawFrame;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
}

/// Channel buffer size for scanned frames.
pub const FRAME_CHANNEL_BUFFER_SIZE: usize = 256;

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
        }
    }
}

/// Start scanning with the given backend.
///
/// Frames for every device in range are delivered, including repeated
/// advertisements from the same device. The scan runs until the receiver is
/// dropped.
pub async fn start_scan(backend: Backend) -> Result<mpsc::Receiver<RawFrame>, ScanError> {
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => bluer::start_scan().await,
        #[cfg(feature = "hci")]
        Backend::Hci => hci::start_scan().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::ValueEnum;

    #[test]
    fn test_scan_error_display() {
        let err = ScanError::Bluetooth("adapter not found".to_string());
        assert_eq!(err.to_string(), "Bluetooth error: adapter not found");
    }

    #[cfg(all(feature = "bluer", feature = "hci"))]
    #[test]
    fn test_backend_value_names() {
        assert_eq!(Backend::from_str("bluer", true).unwrap(), Backend::Bluer);
        assert_eq!(Backend::from_str("hci", true).unwrap(), Backend::Hci);
        assert!(Backend::from_str("usb", true).is_err());
    }

    #[cfg(all(feature = "bluer", feature = "hci"))]
    #[test]
    fn test_backend_display() {
        assert_eq!(format!("{}", Backend::Bluer), "bluer");
        assert_eq!(format!("{}", Backend::Hci), "hci");
    }
}
