//! usb-serial-bridge daemon
//!
//! Owns one USB serial device for its whole lifetime and bridges it to the
//! host process over two local channels. Lines coming from the device are
//! framed at `\n` before they are forwarded.

pub mod bridge;
pub mod config;
pub mod error;
pub mod usb;

pub use bridge::{Bridge, BridgeSettings, BridgeState, BridgeStats, StepOutcome, initialize, run_daemon};
pub use config::DaemonConfig;
pub use error::{DaemonError, Result};
