//! CDC-ACM (standard USB serial class) driver

use crate::error::Result;
use crate::usb::descriptor::DeviceSummary;
use crate::usb::io::{REQUEST_TYPE_CLASS_OUT, UsbIo};
use crate::usb::transport::{BulkPipe, SerialTransport, TransportSettings};
use std::time::Duration;

/// SET_LINE_CODING
pub const SET_LINE_CODING: u8 = 0x20;
/// SET_CONTROL_LINE_STATE
pub const SET_CONTROL_LINE_STATE: u8 = 0x22;

/// Line coding payload: little-endian baud, 1 stop bit, no parity, 8 data bits
pub fn line_coding(baud: u32) -> [u8; 7] {
    let b = baud.to_le_bytes();
    [b[0], b[1], b[2], b[3], 0x00, 0x00, 0x08]
}

#[derive(Debug)]
pub struct CdcAcmDriver<U: UsbIo> {
    pipe: BulkPipe<U>,
}

impl<U: UsbIo> CdcAcmDriver<U> {
    /// Claim both interfaces and set line state and line coding
    ///
    /// On failure every interface claimed so far is released.
    pub fn initialize(
        io: U,
        summary: &DeviceSummary,
        comm_interface: u8,
        data_interface: u8,
        baud: u32,
        settings: TransportSettings,
    ) -> Result<Self> {
        let endpoints = summary.interface_or_err(data_interface)?.bulk_endpoints()?;
        let mut pipe = BulkPipe::new(io, endpoints, settings);

        // Dropping the pipe on error releases what was claimed
        pipe.claim(comm_interface)?;
        pipe.claim(data_interface)?;

        let index = u16::from(comm_interface);
        pipe.control_out(REQUEST_TYPE_CLASS_OUT, SET_CONTROL_LINE_STATE, 0, index, &[])?;
        pipe.control_out(
            REQUEST_TYPE_CLASS_OUT,
            SET_LINE_CODING,
            0,
            index,
            &line_coding(baud),
        )?;

        Ok(Self { pipe })
    }
}

impl<U: UsbIo> SerialTransport for CdcAcmDriver<U> {
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
