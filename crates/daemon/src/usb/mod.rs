//! USB subsystem
//!
//! Opens the device, classifies it, and drives it as a serial port:
//! - Device references and opening (rusb)
//! - Descriptor snapshot used for classification and endpoint resolution
//! - Classifier selecting the CDC-ACM or CH340 driver
//! - Both drivers behind the [`SerialTransport`] trait

pub mod cdc_acm;
pub mod ch340;
pub mod classifier;
pub mod descriptor;
pub mod device;
pub mod io;
pub mod transport;

pub use classifier::{Classifier, DeviceKind};
pub use descriptor::DeviceSummary;
pub use device::{DeviceRef, OpenedDevice, open_device};
pub use io::UsbIo;
pub use transport::{SerialDriver, SerialTransport, TransportSettings};
