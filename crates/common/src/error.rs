//! Common error types

use protocol::{ChannelId, ProtocolError, RejectReason};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Channel {0} closed by peer")]
    ChannelClosed(ChannelId),

    #[error("Handshake on channel {channel} timed out after {timeout:?}")]
    HandshakeTimeout {
        channel: ChannelId,
        timeout: Duration,
    },

    #[error("Handshake on channel {channel} rejected: {reason}")]
    HandshakeRejected {
        channel: ChannelId,
        reason: RejectReason,
    },

    #[error("Handshake aborted: {0}")]
    HandshakeAborted(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error means the handshake did not complete
    pub fn is_handshake_failure(&self) -> bool {
        matches!(
            self,
            Error::HandshakeTimeout { .. }
                | Error::HandshakeRejected { .. }
                | Error::HandshakeAborted(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
