//! Device classification
//!
//! Decides which serial driver handles a device. Standard CDC-ACM devices
//! are recognized by interface class; vendor chips by exact VID:PID.

use crate::error::{DaemonError, Result};
use crate::usb::descriptor::DeviceSummary;
use tracing::debug;

/// Communications interface class (CDC)
pub const CLASS_COMM: u8 = 0x02;
/// Data interface class (CDC-Data)
pub const CLASS_DATA: u8 = 0x0A;
/// Vendor-specific interface class
pub const CLASS_VENDOR_SPECIFIC: u8 = 0xFF;

/// WCH CH340
pub const CH340_VENDOR_ID: u16 = 0x1A86;
pub const CH340_PRODUCT_ID: u16 = 0x7523;

/// Driver selected for a device, with the interfaces it will claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// CDC-ACM: separate communications and data interfaces
    StandardSerial {
        comm_interface: u8,
        data_interface: u8,
    },
    /// CH340-style chip with a single vendor-class interface
    VendorChip { interface: u8 },
}

impl DeviceKind {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceKind::StandardSerial { .. } => "CDC-ACM",
            DeviceKind::VendorChip { .. } => "CH340",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Classifier {
    vendor_chips: Vec<(u16, u16)>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            vendor_chips: vec![(CH340_VENDOR_ID, CH340_PRODUCT_ID)],
        }
    }
}

impl Classifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a device
    ///
    /// CDC-ACM is checked first, so a vendor chip that also exposes
    /// standard interfaces is driven as CDC-ACM.
    pub fn classify(&self, summary: &DeviceSummary) -> Result<DeviceKind> {
        let comm = summary.interface_by_class(CLASS_COMM);
        let data = summary.interface_by_class(CLASS_DATA);

        if let (Some(comm), Some(data)) = (comm, data) {
            let kind = DeviceKind::StandardSerial {
                comm_interface: comm.number,
                data_interface: data.number,
            };
            debug!("Classified {:04x}:{:04x} as {:?}", summary.vendor_id, summary.product_id, kind);
            return Ok(kind);
        }

        if self.is_vendor_chip(summary.vendor_id, summary.product_id) {
            if let Some(iface) = summary.interface_by_class(CLASS_VENDOR_SPECIFIC) {
                let kind = DeviceKind::VendorChip {
                    interface: iface.number,
                };
                debug!("Classified {:04x}:{:04x} as {:?}", summary.vendor_id, summary.product_id, kind);
                return Ok(kind);
            }
        }

        Err(DaemonError::DeviceUnsupported {
            vendor_id: summary.vendor_id,
            product_id: summary.product_id,
        })
    }

    fn is_vendor_chip(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_chips.contains(&(vendor_id, product_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::descriptor::InterfaceSummary;

    fn summary(vendor_id: u16, product_id: u16, classes: &[u8]) -> DeviceSummary {
        DeviceSummary {
            vendor_id,
            product_id,
            bus_number: 1,
            address: 2,
            class_code: 0,
            configuration: 1,
            interfaces: classes
                .iter()
                .enumerate()
                .map(|(i, &class_code)| InterfaceSummary {
                    number: i as u8,
                    class_code,
                    sub_class_code: 0,
                    protocol_code: 0,
                    endpoints: Vec::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_cdc_acm_by_interface_class() {
        let kind = Classifier::new()
            .classify(&summary(0x2341, 0x0043, &[CLASS_COMM, CLASS_DATA]))
            .unwrap();
        assert_eq!(
            kind,
            DeviceKind::StandardSerial {
                comm_interface: 0,
                data_interface: 1
            }
        );
    }

    #[test]
    fn test_ch340_by_vid_pid() {
        let kind = Classifier::new()
            .classify(&summary(CH340_VENDOR_ID, CH340_PRODUCT_ID, &[CLASS_VENDOR_SPECIFIC]))
            .unwrap();
        assert_eq!(kind, DeviceKind::VendorChip { interface: 0 });
    }

    #[test]
    fn test_standard_serial_takes_precedence() {
        let kind = Classifier::new()
            .classify(&summary(
                CH340_VENDOR_ID,
                CH340_PRODUCT_ID,
                &[CLASS_COMM, CLASS_DATA, CLASS_VENDOR_SPECIFIC],
            ))
            .unwrap();
        assert!(matches!(kind, DeviceKind::StandardSerial { .. }));
    }

    #[test]
    fn test_comm_without_data_is_unsupported() {
        let err = Classifier::new()
            .classify(&summary(0x0403, 0x6001, &[CLASS_COMM]))
            .unwrap_err();
        assert!(matches!(
            err,
            DaemonError::DeviceUnsupported {
                vendor_id: 0x0403,
                product_id: 0x6001
            }
        ));
    }

    #[test]
    fn test_vendor_class_with_other_ids_is_unsupported() {
        let err = Classifier::new()
            .classify(&summary(0x10c4, 0xea60, &[CLASS_VENDOR_SPECIFIC]))
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_ch340_without_vendor_interface_is_unsupported() {
        let result = Classifier::new().classify(&summary(CH340_VENDOR_ID, CH340_PRODUCT_ID, &[0x08]));
        assert!(matches!(result, Err(DaemonError::DeviceUnsupported { .. })));
    }
}
