//! Raw HCI socket backend.
//!
//! This backend uses raw Linux HCI sockets to scan for BLE advertisements
//! without requiring the BlueZ daemon. It requires CAP_NET_RAW and
//! CAP_NET_ADMIN capabilities or root privileges.
//!
//! The scan is passive, so only advertising PDUs are seen; names that
//! devices put into scan responses are not collected.

use super::{FRAME_CHANNEL_BUFFER_SIZE, ScanError};
use crate::advertisement::{RawFrame, parse_ad_structures};
use crate::mac_address::MacAddress;
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_NONBLOCK, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tracing::warn;

const BTPROTO_HCI: c_int = 1;
const SOL_HCI: c_int = 0;
const HCI_FILTER: c_int = 2;
const HCI_CHANNEL_RAW: u16 = 0;

const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;
const EVT_LE_META_EVENT: u8 = 0x3E;
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

const LE_SCAN_PASSIVE: u8 = 0x00;
const LE_PUBLIC_ADDRESS: u8 = 0x00;
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;
/// 10 ms in units of 0.625 ms.
const SCAN_INTERVAL: u16 = 0x0010;
const SCAN_WINDOW: u16 = 0x0010;

/// RSSI value meaning "not available".
const RSSI_UNAVAILABLE: i8 = 127;
/// Largest HCI event: header plus 255 parameter bytes.
const MAX_EVENT_SIZE: usize = 258;

#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// Kernel-side filter for a raw HCI socket.
#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    /// Pass only LE meta events.
    fn le_meta_events() -> Self {
        let mut filter = Self {
            type_mask: 0,
            event_mask: [0, 0],
            opcode: 0,
        };
        filter.type_mask |= 1 << u32::from(HCI_EVENT_PKT);
        let bit = usize::from(EVT_LE_META_EVENT);
        filter.event_mask[bit / 32] |= 1 << (bit % 32);
        filter
    }
}

fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

fn os_error(what: &str) -> ScanError {
    ScanError::Bluetooth(format!("{what}: {}", io::Error::last_os_error()))
}

/// A non-blocking raw HCI socket bound to one controller.
struct HciSocket {
    fd: OwnedFd,
}

impl HciSocket {
    fn open(dev_id: u16) -> Result<Self, ScanError> {
        let raw = unsafe {
            libc::socket(
                AF_BLUETOOTH,
                SOCK_RAW | SOCK_CLOEXEC | SOCK_NONBLOCK,
                BTPROTO_HCI,
            )
        };
        if raw < 0 {
            return Err(os_error("Failed to create HCI socket"));
        }
        let socket = Self {
            fd: unsafe { OwnedFd::from_raw_fd(raw) },
        };

        let addr = SockaddrHci {
            hci_family: AF_BLUETOOTH as u16,
            hci_dev: dev_id,
            hci_channel: HCI_CHANNEL_RAW,
        };
        let ret = unsafe {
            libc::bind(
                socket.fd.as_raw_fd(),
                &addr as *const SockaddrHci as *const sockaddr,
                mem::size_of::<SockaddrHci>() as socklen_t,
            )
        };
        if ret < 0 {
            return Err(os_error("Failed to bind HCI socket"));
        }

        Ok(socket)
    }

    fn set_filter(&self, filter: &HciFilter) -> Result<(), ScanError> {
        let ret = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                SOL_HCI,
                HCI_FILTER,
                filter as *const HciFilter as *const c_void,
                mem::size_of::<HciFilter>() as socklen_t,
            )
        };
        if ret < 0 {
            return Err(os_error("Failed to set HCI filter"));
        }
        Ok(())
    }

    fn send_command(&self, ocf: u16, params: &[u8]) -> Result<(), ScanError> {
        let packet = hci_command_packet(OGF_LE_CTL, ocf, params);
        let ret = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                packet.as_ptr() as *const c_void,
                packet.len(),
            )
        };
        if ret < 0 {
            return Err(os_error("Failed to send HCI command"));
        }
        Ok(())
    }

    /// Passive scan that reports duplicates.
    fn enable_le_scan(&self) -> Result<(), ScanError> {
        let mut params = vec![LE_SCAN_PASSIVE];
        params.extend_from_slice(&SCAN_INTERVAL.to_le_bytes());
        params.extend_from_slice(&SCAN_WINDOW.to_le_bytes());
        params.extend_from_slice(&[LE_PUBLIC_ADDRESS, FILTER_POLICY_ACCEPT_ALL]);
        self.send_command(OCF_LE_SET_SCAN_PARAMETERS, &params)?;

        // enable, no duplicate filtering
        self.send_command(OCF_LE_SET_SCAN_ENABLE, &[0x01, 0x00])
    }
}

impl AsRawFd for HciSocket {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.fd.as_raw_fd()
    }
}

/// Parse an HCI LE advertising report event into frames.
///
/// `event` starts at the packet type byte. Reports are laid out one after
/// another; parsing stops at the first truncated one.
fn parse_advertising_report(event: &[u8]) -> Vec<RawFrame> {
    let mut frames = Vec::new();
    if event.len() < 5
        || event[0] != HCI_EVENT_PKT
        || event[1] != EVT_LE_META_EVENT
        || event[3] != EVT_LE_ADVERTISING_REPORT
    {
        return frames;
    }

    let num_reports = usize::from(event[4]);
    let mut rest = &event[5..];

    for _ in 0..num_reports {
        // event type, address type, address, data length
        if rest.len() < 9 {
            break;
        }
        let mut addr = [0u8; 6];
        addr.copy_from_slice(&rest[2..8]);
        addr.reverse();

        let data_len = usize::from(rest[8]);
        if rest.len() < 9 + data_len + 1 {
            break;
        }
        let data = &rest[9..9 + data_len];
        let rssi = rest[9 + data_len] as i8;

        frames.push(RawFrame {
            address: MacAddress(addr),
            rssi: (rssi != RSSI_UNAVAILABLE).then_some(i16::from(rssi)),
            advertisement: parse_ad_structures(data),
        });
        rest = &rest[9 + data_len + 1..];
    }

    frames
}

fn read_event(socket: &HciSocket, buf: &mut [u8]) -> io::Result<usize> {
    let ret = unsafe { libc::read(socket.as_raw_fd(), buf.as_mut_ptr() as *mut c_void, buf.len()) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

/// What the scan loop does after a read attempt.
#[derive(Debug, PartialEq, Eq)]
enum ReadStep {
    /// An event of this many bytes is in the buffer.
    Event(usize),
    /// Interrupted by a signal, read again.
    Retry,
    /// The socket is closed or broken.
    Stop,
}

fn read_step(result: io::Result<usize>) -> ReadStep {
    match result {
        Ok(0) => ReadStep::Stop,
        Ok(n) => ReadStep::Event(n),
        Err(e) if e.kind() == io::ErrorKind::Interrupted => ReadStep::Retry,
        Err(e) => {
            warn!(error = %e, "HCI read failed, stopping scan");
            ReadStep::Stop
        }
    }
}

/// Start a passive LE scan on `hci0`.
///
/// # Requirements
/// - CAP_NET_RAW and CAP_NET_ADMIN capabilities or root privileges
/// - An available HCI device (typically hci0)
pub async fn start_scan() -> Result<mpsc::Receiver<RawFrame>, ScanError> {
    let events = HciSocket::open(0)?;
    events.set_filter(&HciFilter::le_meta_events())?;

    let commands = HciSocket::open(0)?;
    commands.enable_le_scan()?;

    let (tx, rx) = mpsc::channel(FRAME_CHANNEL_BUFFER_SIZE);
    let async_fd = AsyncFd::new(events)
        .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {e}")))?;

    tokio::spawn(async move {
        let _commands = commands;
        let mut buf = [0u8; MAX_EVENT_SIZE];

        'scan: loop {
            let mut guard = match async_fd.readable().await {
                Ok(guard) => guard,
                Err(e) => {
                    warn!(error = %e, "HCI socket failed");
                    break;
                }
            };

            // Drain all queued events before waiting again
            loop {
                let read = match guard.try_io(|socket| read_event(socket.get_ref(), &mut buf)) {
                    Ok(read) => read,
                    Err(_would_block) => break,
                };
                let n = match read_step(read) {
                    ReadStep::Event(n) => n,
                    ReadStep::Retry => continue,
                    ReadStep::Stop => break 'scan,
                };

                for frame in parse_advertising_report(&buf[..n]) {
                    if tx.send(frame).await.is_err() {
                        break 'scan;
                    }
                }
            }
        }
    });

    Ok(rx)
}
