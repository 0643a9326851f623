//! Device references and opening
//!
//! A device can be named three ways on the command line:
//!
//! - `fd:<n>` or `<n>`: an already-opened usbfs file descriptor, as handed
//!   out by Android's `termux-usb`
//! - `<bus>-<address>`: decimal bus number and device address
//! - `<vid>:<pid>`: hexadecimal vendor and product id

use crate::error::{DaemonError, Result};
use crate::usb::descriptor::DeviceSummary;
use rusb::{Context, DeviceHandle, UsbContext};
use std::fmt;
use std::os::fd::RawFd;
use std::str::FromStr;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRef {
    Fd(RawFd),
    BusAddress { bus: u8, address: u8 },
    VidPid { vendor_id: u16, product_id: u16 },
}

impl FromStr for DeviceRef {
    type Err = DaemonError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || DaemonError::InvalidDeviceRef(s.to_string());
        let s = s.trim();

        if let Some(fd) = s.strip_prefix("fd:") {
            return fd.parse().map(DeviceRef::Fd).map_err(|_| invalid());
        }

        if let Some((vid, pid)) = s.split_once(':') {
            let parse_hex = |part: &str| {
                let part = part
                    .strip_prefix("0x")
                    .or_else(|| part.strip_prefix("0X"))
                    .unwrap_or(part);
                u16::from_str_radix(part, 16).map_err(|_| invalid())
            };
            return Ok(DeviceRef::VidPid {
                vendor_id: parse_hex(vid)?,
                product_id: parse_hex(pid)?,
            });
        }

        if let Some((bus, address)) = s.split_once('-') {
            return Ok(DeviceRef::BusAddress {
                bus: bus.parse().map_err(|_| invalid())?,
                address: address.parse().map_err(|_| invalid())?,
            });
        }

        s.parse().map(DeviceRef::Fd).map_err(|_| invalid())
    }
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRef::Fd(fd) => write!(f, "fd:{}", fd),
            DeviceRef::BusAddress { bus, address } => write!(f, "{:03}-{:03}", bus, address),
            DeviceRef::VidPid {
                vendor_id,
                product_id,
            } => write!(f, "{:04x}:{:04x}", vendor_id, product_id),
        }
    }
}

/// An opened device with its descriptor snapshot
pub struct OpenedDevice {
    pub handle: DeviceHandle<Context>,
    pub summary: DeviceSummary,
}

impl fmt::Debug for OpenedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenedDevice")
            .field("summary", &self.summary)
            .finish_non_exhaustive()
    }
}

/// Open the referenced device
pub fn open_device(reference: &DeviceRef) -> Result<OpenedDevice> {
    let open_err = |source: rusb::Error| DaemonError::DeviceOpen {
        device: reference.to_string(),
        source,
    };

    if let DeviceRef::Fd(_) = reference {
        // A wrapped fd is the only way in on Android; enumeration would fail there
        rusb::disable_device_discovery().map_err(open_err)?;
    }

    let context = Context::new().map_err(open_err)?;

    let handle = match *reference {
        DeviceRef::Fd(fd) => {
            // SAFETY: the fd was handed to this process for exclusive use and
            // stays open for the process lifetime.
            unsafe { context.open_device_with_fd(fd) }.map_err(open_err)?
        }
        DeviceRef::VidPid {
            vendor_id,
            product_id,
        } => context
            .open_device_with_vid_pid(vendor_id, product_id)
            .ok_or_else(|| open_err(rusb::Error::NotFound))?,
        DeviceRef::BusAddress { bus, address } => {
            let devices = context.devices().map_err(open_err)?;
            let device = devices
                .iter()
                .find(|d| d.bus_number() == bus && d.address() == address)
                .ok_or_else(|| open_err(rusb::Error::NotFound))?;
            device.open().map_err(open_err)?
        }
    };

    let summary = DeviceSummary::from_device(&handle.device())?;
    debug!("Device summary:\n{}", summary);
    info!(
        "Opened device {} ({:04x}:{:04x})",
        reference, summary.vendor_id, summary.product_id
    );

    Ok(OpenedDevice { handle, summary })
}
