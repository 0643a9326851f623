//! Serial transport over USB bulk endpoints
//!
//! Both drivers end up with the same shape once configured: a set of
//! claimed interfaces and a bulk IN/OUT endpoint pair. [`BulkPipe`] holds
//! that state and implements the byte-level operations; the drivers only
//! differ in how they claim and configure the device.

use crate::error::{DaemonError, Result, map_rusb_error};
use crate::usb::cdc_acm::CdcAcmDriver;
use crate::usb::ch340::Ch340Driver;
use crate::usb::classifier::DeviceKind;
use crate::usb::descriptor::{BulkEndpoints, DeviceSummary};
use crate::usb::io::UsbIo;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timeout of each purge read
const PURGE_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Byte-level serial operations the bridge needs
pub trait SerialTransport {
    /// Send bytes to the device in one bulk OUT transfer
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// One bulk IN transfer of at most `max` bytes
    ///
    /// A timeout yields an empty vector rather than an error.
    fn read(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>>;

    /// Drain and discard whatever the device has buffered
    ///
    /// Returns the number of bytes discarded.
    fn purge(&mut self) -> Result<usize>;

    /// Release claimed interfaces. Calling it again is a no-op.
    fn close(&mut self);
}

/// Transfer bounds shared by both drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSettings {
    pub write_timeout: Duration,
    pub control_timeout: Duration,
    pub purge_chunk_size: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(1),
            control_timeout: Duration::from_secs(1),
            purge_chunk_size: 64,
        }
    }
}

/// Claimed interfaces plus resolved bulk endpoints
#[derive(Debug)]
pub struct BulkPipe<U: UsbIo> {
    io: U,
    endpoints: BulkEndpoints,
    claimed: Vec<u8>,
    settings: TransportSettings,
}

impl<U: UsbIo> BulkPipe<U> {
    pub fn new(io: U, endpoints: BulkEndpoints, settings: TransportSettings) -> Self {
        Self {
            io,
            endpoints,
            claimed: Vec::new(),
            settings,
        }
    }

    pub fn endpoints(&self) -> BulkEndpoints {
        self.endpoints
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// Detach any kernel driver from `interface` and claim it
    pub fn claim(&mut self, interface: u8) -> Result<()> {
        self.io.detach_kernel_driver(interface).map_err(map_rusb_error)?;
        self.io.claim_interface(interface).map_err(map_rusb_error)?;
        self.claimed.push(interface);
        debug!("Claimed interface {}", interface);
        Ok(())
    }

    /// Host-to-device control request
    pub fn control_out(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> Result<()> {
        self.io
            .write_control(
                request_type,
                request,
                value,
                index,
                data,
                self.settings.control_timeout,
            )
            .map_err(map_rusb_error)?;
        Ok(())
    }

    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.io
            .write_bulk(self.endpoints.bulk_out, data, self.settings.write_timeout)
            .map_err(map_rusb_error)
    }

    pub fn read(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; max];
        match self.io.read_bulk(self.endpoints.bulk_in, &mut buf, timeout) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(rusb::Error::Timeout) => Ok(Vec::new()),
            Err(e) => Err(DaemonError::Usb(e)),
        }
    }

    pub fn purge(&mut self) -> Result<usize> {
        let mut discarded = 0;
        loop {
            let chunk = self.read(self.settings.purge_chunk_size, PURGE_READ_TIMEOUT)?;
            if chunk.is_empty() {
                break;
            }
            discarded += chunk.len();
        }
        Ok(discarded)
    }

    pub fn close(&mut self) {
        for interface in self.claimed.drain(..).rev() {
            match self.io.release_interface(interface) {
                Ok(()) => debug!("Released interface {}", interface),
                Err(e) => warn!("Failed to release interface {}: {}", interface, e),
            }
        }
    }
}

impl<U: UsbIo> Drop for BulkPipe<U> {
    fn drop(&mut self) {
        self.close();
    }
}

/// The driver selected for a device
#[derive(Debug)]
pub enum SerialDriver<U: UsbIo> {
    StandardSerial(CdcAcmDriver<U>),
    VendorChip(Ch340Driver<U>),
}

impl<U: UsbIo> SerialDriver<U> {
    /// Construct and configure the driver matching `kind`
    pub fn initialize(
        io: U,
        kind: DeviceKind,
        summary: &DeviceSummary,
        baud: u32,
        settings: TransportSettings,
    ) -> Result<Self> {
        let driver = match kind {
            DeviceKind::StandardSerial {
                comm_interface,
                data_interface,
            } => SerialDriver::StandardSerial(CdcAcmDriver::initialize(
                io,
                summary,
                comm_interface,
                data_interface,
                baud,
                settings,
            )?),
            DeviceKind::VendorChip { interface } => SerialDriver::VendorChip(
                Ch340Driver::initialize(io, summary, interface, baud, settings)?,
            ),
        };

        info!("{} driver configured at {} baud", kind.name(), baud);
        Ok(driver)
    }

    fn transport(&mut self) -> &mut dyn SerialTransport {
        match self {
            SerialDriver::StandardSerial(d) => d,
            SerialDriver::VendorChip(d) => d,
        }
    }
}

impl<U: UsbIo> SerialTransport for SerialDriver<U> {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.transport().write(data)
    }

    fn read(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>> {
        self.transport().read(max, timeout)
    }

    fn purge(&mut self) -> Result<usize> {
        self.transport().purge()
    }

    fn close(&mut self) {
        self.transport().close()
    }
}
