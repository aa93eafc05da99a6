//! BlueZ D-Bus backend.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.
//!
//! BlueZ caches advertisement contents as device properties; every property
//! change reported during discovery is turned into a fresh [`RawFrame`] from
//! the current property values.

use super::{FRAME_CHANNEL_BUFFER_SIZE, ScanError};
use crate::advertisement::{Advertisement, RawFrame, ServiceData, uuid_string};
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session};
use futures::StreamExt;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Start LE discovery on the default adapter.
///
/// Duplicate advertisements are requested so that sensor tags keep
/// producing frames while they stay in range.
pub async fn start_scan() -> Result<mpsc::Receiver<RawFrame>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;

    adapter
        .set_discovery_filter(DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            duplicate_data: true,
            ..Default::default()
        })
        .await?;

    let events = adapter.discover_devices_with_changes().await?;
    let (tx, rx) = mpsc::channel(FRAME_CHANNEL_BUFFER_SIZE);

    // The task owns the session so discovery stays active while it runs
    tokio::spawn(async move {
        let _session = session;
        let mut events = Box::pin(events);

        while let Some(event) = events.next().await {
            let AdapterEvent::DeviceAdded(address) = event else {
                continue;
            };
            match read_frame(&adapter, address).await {
                Ok(frame) => {
                    if tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(e) => debug!(%address, error = %e, "failed to read device properties"),
            }
        }
        warn!("bluetooth discovery ended");
    });

    Ok(rx)
}

/// Read the advertisement-related properties of a device.
async fn read_frame(adapter: &Adapter, address: Address) -> Result<RawFrame, ScanError> {
    let device = adapter.device(address)?;

    let mut service_uuids: Vec<String> = device
        .uuids()
        .await?
        .unwrap_or_default()
        .into_iter()
        .map(|uuid| uuid_string(uuid.as_u128()))
        .collect();
    service_uuids.sort();

    let advertisement = Advertisement {
        service_uuids,
        service_data: service_data(device.service_data().await?.unwrap_or_default()),
        manufacturer_data: device
            .manufacturer_data()
            .await?
            .and_then(manufacturer_data),
        local_name: device.name().await?,
    };

    Ok(RawFrame {
        address: address.into(),
        rssi: device.rssi().await?,
        advertisement,
    })
}

/// BlueZ strips the company id off manufacturer data; put it back in front
/// so decoders see the payload as advertised. Only one block is expected per
/// device; with several the lowest company id wins.
fn manufacturer_data(blocks: HashMap<u16, Vec<u8>>) -> Option<Vec<u8>> {
    let (id, data) = blocks.into_iter().min_by_key(|(id, _)| *id)?;
    let mut bytes = id.to_le_bytes().to_vec();
    bytes.extend(data);
    Some(bytes)
}

fn service_data(blocks: HashMap<bluer::Uuid, Vec<u8>>) -> Vec<ServiceData> {
    let mut blocks: Vec<ServiceData> = blocks
        .into_iter()
        .map(|(uuid, data)| ServiceData {
            uuid: uuid_string(uuid.as_u128()),
            data,
        })
        .collect();
    blocks.sort_by(|a, b| a.uuid.cmp(&b.uuid));
    blocks
}
