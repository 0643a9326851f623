//! Owned snapshot of a device's descriptors
//!
//! Classification and endpoint resolution work on this snapshot rather than
//! on live rusb descriptors, so both run without hardware.

use crate::error::{DaemonError, Result};
use rusb::{Device, UsbContext};
use std::fmt;

/// Endpoint address bit marking device-to-host endpoints
pub const ENDPOINT_DIR_IN: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

impl From<rusb::TransferType> for TransferKind {
    fn from(t: rusb::TransferType) -> Self {
        match t {
            rusb::TransferType::Control => TransferKind::Control,
            rusb::TransferType::Isochronous => TransferKind::Isochronous,
            rusb::TransferType::Bulk => TransferKind::Bulk,
            rusb::TransferType::Interrupt => TransferKind::Interrupt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSummary {
    pub address: u8,
    pub transfer_kind: TransferKind,
}

impl EndpointSummary {
    pub fn is_in(&self) -> bool {
        self.address & ENDPOINT_DIR_IN != 0
    }
}

/// Resolved bulk endpoint addresses of a data interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkEndpoints {
    pub bulk_in: u8,
    pub bulk_out: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSummary {
    pub number: u8,
    pub class_code: u8,
    pub sub_class_code: u8,
    pub protocol_code: u8,
    pub endpoints: Vec<EndpointSummary>,
}

impl InterfaceSummary {
    /// Pick the bulk IN and bulk OUT endpoints by address direction bit
    pub fn bulk_endpoints(&self) -> Result<BulkEndpoints> {
        let mut bulk_in = None;
        let mut bulk_out = None;

        for ep in self
            .endpoints
            .iter()
            .filter(|ep| ep.transfer_kind == TransferKind::Bulk)
        {
            if ep.is_in() {
                bulk_in.get_or_insert(ep.address);
            } else {
                bulk_out.get_or_insert(ep.address);
            }
        }

        let bulk_in = bulk_in.ok_or(DaemonError::EndpointNotFound {
            interface: self.number,
            direction: "IN",
        })?;
        let bulk_out = bulk_out.ok_or(DaemonError::EndpointNotFound {
            interface: self.number,
            direction: "OUT",
        })?;

        Ok(BulkEndpoints { bulk_in, bulk_out })
    }
}

/// Device descriptor plus active configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus_number: u8,
    pub address: u8,
    pub class_code: u8,
    pub configuration: u8,
    pub interfaces: Vec<InterfaceSummary>,
}

impl DeviceSummary {
    /// Read descriptors from a rusb device
    ///
    /// Only the first alternate setting of each interface is recorded.
    pub fn from_device<T: UsbContext>(device: &Device<T>) -> Result<Self> {
        let descriptor = device.device_descriptor()?;
        let config = device.active_config_descriptor()?;

        let interfaces = config
            .interfaces()
            .filter_map(|interface| interface.descriptors().next())
            .map(|alt| InterfaceSummary {
                number: alt.interface_number(),
                class_code: alt.class_code(),
                sub_class_code: alt.sub_class_code(),
                protocol_code: alt.protocol_code(),
                endpoints: alt
                    .endpoint_descriptors()
                    .map(|ep| EndpointSummary {
                        address: ep.address(),
                        transfer_kind: ep.transfer_type().into(),
                    })
                    .collect(),
            })
            .collect();

        Ok(Self {
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
            bus_number: device.bus_number(),
            address: device.address(),
            class_code: descriptor.class_code(),
            configuration: config.number(),
            interfaces,
        })
    }

    pub fn interface(&self, number: u8) -> Option<&InterfaceSummary> {
        self.interfaces.iter().find(|i| i.number == number)
    }

    /// First interface with the given class code
    pub fn interface_by_class(&self, class_code: u8) -> Option<&InterfaceSummary> {
        self.interfaces.iter().find(|i| i.class_code == class_code)
    }

    pub fn interface_or_err(&self, number: u8) -> Result<&InterfaceSummary> {
        self.interface(number).ok_or(DaemonError::EndpointNotFound {
            interface: number,
            direction: "IN/OUT",
        })
    }
}

impl fmt::Display for DeviceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Device {:04x}:{:04x} (bus {:03} address {:03}, class {:#04x})",
            self.vendor_id, self.product_id, self.bus_number, self.address, self.class_code
        )?;
        writeln!(f, "  Configuration {}", self.configuration)?;
        for iface in &self.interfaces {
            writeln!(
                f,
                "    Interface {}: class {:#04x} subclass {:#04x} protocol {:#04x}",
                iface.number, iface.class_code, iface.sub_class_code, iface.protocol_code
            )?;
            for ep in &iface.endpoints {
                writeln!(
                    f,
                    "      Endpoint {:#04x} {} {:?}",
                    ep.address,
                    if ep.is_in() { "IN " } else { "OUT" },
                    ep.transfer_kind
                )?;
            }
        }
        Ok(())
    }
}
