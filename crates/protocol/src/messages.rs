//! Handshake message definitions
//!
//! Every channel connection opens with one exchange:
//! the connecting side sends [`HandshakeMessage::Hello`], the accepting side
//! answers [`HandshakeMessage::Accept`] or [`HandshakeMessage::Reject`].
//! Messages are postcard-encoded and carried as ordinary channel messages.
//!
//! The token is a fixed constant. It keeps a stray local process from being
//! mistaken for the peer; it is not an authentication mechanism.

use crate::error::{ProtocolError, Result};
use crate::version::{CURRENT_VERSION, ProtocolVersion};
use serde::{Deserialize, Serialize};

/// Shared token both sides present during the handshake
pub const HANDSHAKE_TOKEN: &str = "usb-serial-bridge/v1";

/// Identity and direction of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelId {
    /// Channel A: host writes, daemon reads. Host listens, daemon connects.
    HostToDaemon,
    /// Channel B: daemon writes, host reads. Daemon listens, host connects.
    DaemonToHost,
}

impl ChannelId {
    /// Short label used in logs
    pub fn label(&self) -> &'static str {
        match self {
            ChannelId::HostToDaemon => "A (host->daemon)",
            ChannelId::DaemonToHost => "B (daemon->host)",
        }
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Why an accepting side turned a connection away
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Token missing or wrong
    BadToken,
    /// Major protocol version differs
    IncompatibleVersion { expected: ProtocolVersion },
    /// Peer connected to the wrong listener
    WrongChannel { expected: ChannelId },
    /// First message was not a Hello
    UnexpectedMessage,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::BadToken => f.write_str("bad handshake token"),
            RejectReason::IncompatibleVersion { expected } => {
                write!(f, "incompatible protocol version (expected {})", expected)
            }
            RejectReason::WrongChannel { expected } => {
                write!(f, "wrong channel (expected {})", expected)
            }
            RejectReason::UnexpectedMessage => f.write_str("expected Hello"),
        }
    }
}

/// Messages exchanged while a channel is being established
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeMessage {
    /// Sent by the connecting side
    Hello {
        /// Protocol version of the sender
        version: ProtocolVersion,
        /// Shared token, must equal [`HANDSHAKE_TOKEN`]
        token: String,
        /// Which channel the sender believes it is opening
        channel: ChannelId,
    },

    /// Connection accepted; the channel is live after this message
    Accept,

    /// Connection refused; the accepting side closes it
    Reject {
        /// Reason for refusal
        reason: RejectReason,
    },
}

impl HandshakeMessage {
    /// Build the Hello for `channel` with the current version and shared token
    pub fn hello(channel: ChannelId) -> Self {
        HandshakeMessage::Hello {
            version: CURRENT_VERSION,
            token: HANDSHAKE_TOKEN.to_string(),
            channel,
        }
    }

    /// Check a received message as the accepting side of `expected`
    pub fn validate_hello(&self, expected: ChannelId) -> std::result::Result<(), RejectReason> {
        let HandshakeMessage::Hello {
            version,
            token,
            channel,
        } = self
        else {
            return Err(RejectReason::UnexpectedMessage);
        };

        if token != HANDSHAKE_TOKEN {
            return Err(RejectReason::BadToken);
        }
        if !CURRENT_VERSION.is_compatible_with(version) {
            return Err(RejectReason::IncompatibleVersion {
                expected: CURRENT_VERSION,
            });
        }
        if *channel != expected {
            return Err(RejectReason::WrongChannel { expected });
        }
        Ok(())
    }
}

/// Encode a handshake message with postcard
pub fn encode_handshake(message: &HandshakeMessage) -> Result<Vec<u8>> {
    postcard::to_allocvec(message).map_err(ProtocolError::from)
}

/// Decode a handshake message with postcard
pub fn decode_handshake(bytes: &[u8]) -> Result<HandshakeMessage> {
    postcard::from_bytes(bytes).map_err(ProtocolError::from)
}
