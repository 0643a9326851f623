//! CH340 vendor-chip driver
//!
//! The chip has no class protocol. It is configured with a fixed
//! vendor-request sequence followed by two baud-dependent requests whose
//! index fields come from [`BAUD_TABLE`].

use crate::error::{DaemonError, Result};
use crate::usb::descriptor::DeviceSummary;
use crate::usb::io::{REQUEST_TYPE_VENDOR_OUT, UsbIo};
use crate::usb::transport::{BulkPipe, SerialTransport, TransportSettings};
use std::time::Duration;
use tracing::debug;

const REQUEST_SERIAL_INIT: u8 = 0xA1;
const REQUEST_WRITE_REGISTER: u8 = 0x9A;

/// (request, value, index), issued in order before the baud requests
const INIT_SEQUENCE: [(u8, u16, u16); 3] = [
    (REQUEST_SERIAL_INIT, 0x0000, 0x0000),
    (REQUEST_WRITE_REGISTER, 0x2518, 0x0050),
    (REQUEST_SERIAL_INIT, 0x501F, 0xD90A),
];

const BAUD_REGISTER_1: u16 = 0x1312;
const BAUD_REGISTER_2: u16 = 0x0F2C;

/// Supported baud rates and their two register values
pub const BAUD_TABLE: [(u32, u16, u16); 6] = [
    (2400, 0xD901, 0x0038),
    (4800, 0x6402, 0x001F),
    (9600, 0xB202, 0x0013),
    (19200, 0xD902, 0x000D),
    (38400, 0x6403, 0x000A),
    (115200, 0xCC03, 0x0008),
];

/// Register values for an exact baud rate
pub fn baud_codes(baud: u32) -> Option<(u16, u16)> {
    BAUD_TABLE
        .iter()
        .find(|(rate, _, _)| *rate == baud)
        .map(|&(_, first, second)| (first, second))
}

#[derive(Debug)]
pub struct Ch340Driver<U: UsbIo> {
    pipe: BulkPipe<U>,
}

impl<U: UsbIo> Ch340Driver<U> {
    /// Claim the vendor interface and program the chip
    ///
    /// An unsupported baud rate fails before the device is touched.
    pub fn initialize(
        io: U,
        summary: &DeviceSummary,
        interface: u8,
        baud: u32,
        settings: TransportSettings,
    ) -> Result<Self> {
        let (first, second) = baud_codes(baud).ok_or(DaemonError::UnsupportedBaudRate(baud))?;

        let endpoints = summary.interface_or_err(interface)?.bulk_endpoints()?;
        let mut pipe = BulkPipe::new(io, endpoints, settings);
        pipe.claim(interface)?;

        for (request, value, index) in INIT_SEQUENCE {
            pipe.control_out(REQUEST_TYPE_VENDOR_OUT, request, value, index, &[])?;
        }

        debug!("Baud {} -> {:#06x}/{:#06x}", baud, first, second);
        pipe.control_out(REQUEST_TYPE_VENDOR_OUT, REQUEST_WRITE_REGISTER, BAUD_REGISTER_1, first, &[])?;
        pipe.control_out(REQUEST_TYPE_VENDOR_OUT, REQUEST_WRITE_REGISTER, BAUD_REGISTER_2, second, &[])?;

        Ok(Self { pipe })
    }
}

impl<U: UsbIo> SerialTransport for Ch340Driver<U> {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.pipe.write(data)
    }

    fn read(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>> {
        self.pipe.read(max, timeout)
    }

    fn purge(&mut self) -> Result<usize> {
        self.pipe.purge()
    }

    fn close(&mut self) {
        self.pipe.close()
    }
}
