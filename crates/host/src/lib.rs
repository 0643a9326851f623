//! Host side of usb-serial-bridge
//!
//! Gives a host application a serial-port-like handle ([`HostProxy`]) on a
//! USB serial device owned by a separate daemon process.

pub mod config;
pub mod error;
pub mod process;
pub mod proxy;
pub mod registry;

pub use config::HostConfig;
pub use error::{ProxyError, Result};
pub use process::{DaemonProcess, LaunchRequest};
pub use proxy::HostProxy;
pub use registry::{PortRegistry, parse_port_list};
