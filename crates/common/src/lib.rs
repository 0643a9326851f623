//! Common utilities for usb-serial-bridge
//!
//! This crate provides functionality shared by the daemon and the host:
//! error handling, logging setup, per-instance channel endpoints, and the
//! local channels together with both sides of the dual-channel handshake.

pub mod channel;
pub mod endpoints;
pub mod error;
pub mod handshake;
pub mod logging;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use channel::{ChannelEvent, ChannelListener, ChannelReader, ChannelWriter, connect_channel};
pub use endpoints::{
    ChannelEndpoints, ENV_BAUDRATE, ENV_CHANNEL_A, ENV_CHANNEL_B, ENV_HANDSHAKE_TIMEOUT_MS,
    EndpointDir, default_socket_dir,
};
pub use error::{Error, Result};
pub use handshake::{DaemonChannels, HostChannels, HostHandshake, establish_daemon_side};
pub use logging::setup_logging;
pub use protocol::MAX_MESSAGE_SIZE;
