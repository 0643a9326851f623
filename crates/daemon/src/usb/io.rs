//! Raw USB operations used by the serial drivers
//!
//! The drivers talk to the device only through [`UsbIo`], implemented here
//! for rusb device handles. Tests substitute a recording fake.

use rusb::{DeviceHandle, UsbContext};
use std::time::Duration;
use tracing::{debug, warn};

/// bmRequestType: host-to-device, class, interface recipient
pub const REQUEST_TYPE_CLASS_OUT: u8 = 0x21;
/// bmRequestType: host-to-device, vendor, device recipient
pub const REQUEST_TYPE_VENDOR_OUT: u8 = 0x40;

pub trait UsbIo {
    /// Detach an active kernel driver from `interface`, if any
    fn detach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()>;

    fn claim_interface(&mut self, interface: u8) -> rusb::Result<()>;

    fn release_interface(&mut self, interface: u8) -> rusb::Result<()>;

    /// Host-to-device control transfer
    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;

    fn read_bulk(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize>;

    fn write_bulk(&mut self, endpoint: u8, data: &[u8], timeout: Duration) -> rusb::Result<usize>;
}

impl<T: UsbContext> UsbIo for DeviceHandle<T> {
    fn detach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()> {
        match self.kernel_driver_active(interface) {
            Ok(true) => {
                debug!("Detaching kernel driver from interface {}", interface);
                DeviceHandle::detach_kernel_driver(self, interface)
            }
            Ok(false) => {
                debug!("No kernel driver active on interface {}", interface);
                Ok(())
            }
            // Not supported on this platform, or not queryable through a wrapped fd
            Err(rusb::Error::NotSupported) => Ok(()),
            Err(e) => {
                warn!(
                    "Could not check kernel driver status for interface {}: {}",
                    interface, e
                );
                Ok(())
            }
        }
    }

    fn claim_interface(&mut self, interface: u8) -> rusb::Result<()> {
        DeviceHandle::claim_interface(self, interface)
    }

    fn release_interface(&mut self, interface: u8) -> rusb::Result<()> {
        DeviceHandle::release_interface(self, interface)
    }

    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        debug!(
            "Control transfer: request_type={:#x}, request={:#x}, value={:#x}, index={:#x}, data_len={}",
            request_type,
            request,
            value,
            index,
            data.len()
        );
        DeviceHandle::write_control(self, request_type, request, value, index, data, timeout)
    }

    fn read_bulk(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize> {
        DeviceHandle::read_bulk(self, endpoint, buf, timeout)
    }

    fn write_bulk(&mut self, endpoint: u8, data: &[u8], timeout: Duration) -> rusb::Result<usize> {
        DeviceHandle::write_bulk(self, endpoint, data, timeout)
    }
}

#[cfg(test)]
pub(crate) mod recording {
    //! Recording fake device for driver tests

    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum UsbCall {
        Detach(u8),
        Claim(u8),
        Release(u8),
        Control {
            request_type: u8,
            request: u8,
            value: u16,
            index: u16,
            data: Vec<u8>,
        },
        BulkOut {
            endpoint: u8,
            data: Vec<u8>,
        },
    }

    #[derive(Debug, Default)]
    pub struct FakeState {
        pub calls: Vec<UsbCall>,
        /// Chunks returned by successive bulk IN reads; empty means timeout
        pub inbound: VecDeque<Vec<u8>>,
        pub fail_claim: Option<u8>,
        pub fail_control: bool,
        pub unplugged: bool,
    }

    /// Cloneable handle; clones share one call log
    #[derive(Debug, Clone, Default)]
    pub struct RecordingUsb {
        pub state: Rc<RefCell<FakeState>>,
    }

    impl RecordingUsb {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn calls(&self) -> Vec<UsbCall> {
            self.state.borrow().calls.clone()
        }

        pub fn controls(&self) -> Vec<UsbCall> {
            self.calls()
                .into_iter()
                .filter(|c| matches!(c, UsbCall::Control { .. }))
                .collect()
        }

        pub fn queue_inbound(&self, chunk: &[u8]) {
            self.state.borrow_mut().inbound.push_back(chunk.to_vec());
        }

        pub fn written(&self) -> Vec<u8> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    UsbCall::BulkOut { data, .. } => Some(data),
                    _ => None,
                })
                .flatten()
                .collect()
        }
    }

    impl UsbIo for RecordingUsb {
        fn detach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()> {
            self.state.borrow_mut().calls.push(UsbCall::Detach(interface));
            Ok(())
        }

        fn claim_interface(&mut self, interface: u8) -> rusb::Result<()> {
            let mut state = self.state.borrow_mut();
            if state.fail_claim == Some(interface) {
                return Err(rusb::Error::Busy);
            }
            state.calls.push(UsbCall::Claim(interface));
            Ok(())
        }

        fn release_interface(&mut self, interface: u8) -> rusb::Result<()> {
            self.state.borrow_mut().calls.push(UsbCall::Release(interface));
            Ok(())
        }

        fn write_control(
            &mut self,
            request_type: u8,
            request: u8,
            value: u16,
            index: u16,
            data: &[u8],
            _timeout: Duration,
        ) -> rusb::Result<usize> {
            let mut state = self.state.borrow_mut();
            if state.fail_control {
                return Err(rusb::Error::Timeout);
            }
            state.calls.push(UsbCall::Control {
                request_type,
                request,
                value,
                index,
                data: data.to_vec(),
            });
            Ok(data.len())
        }

        fn read_bulk(&mut self, _endpoint: u8, buf: &mut [u8], _timeout: Duration) -> rusb::Result<usize> {
            let mut state = self.state.borrow_mut();
            if state.unplugged {
                return Err(rusb::Error::NoDevice);
            }
            let Some(mut chunk) = state.inbound.pop_front() else {
                return Err(rusb::Error::Timeout);
            };
            if chunk.is_empty() {
                return Err(rusb::Error::Timeout);
            }
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                state.inbound.push_front(chunk.split_off(n));
            }
            Ok(n)
        }

        fn write_bulk(&mut self, endpoint: u8, data: &[u8], _timeout: Duration) -> rusb::Result<usize> {
            let mut state = self.state.borrow_mut();
            if state.unplugged {
                return Err(rusb::Error::NoDevice);
            }
            state.calls.push(UsbCall::BulkOut {
                endpoint,
                data: data.to_vec(),
            });
            Ok(data.len())
        }
    }
}
