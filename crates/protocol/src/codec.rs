//! Channel message framing
//!
//! Both local channels carry discrete messages rather than a raw byte
//! stream, so a host `write` arrives at the daemon as one unit and every
//! device line arrives at the host as one unit.
//!
//! # Message Format
//!
//! ```text
//! [Length: u32 (big-endian)][Payload bytes]
//! ```
//!
//! Maximum payload size is 1 MiB. Larger host writes are split by the sender.

use crate::error::{ProtocolError, Result};
use bytes::{Buf, Bytes, BytesMut};
use std::io::{Read, Write};

/// Size of the length prefix
pub const HEADER_SIZE: usize = 4;

/// Maximum allowed payload size (1 MiB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Encode a payload with its length prefix
///
/// # Example
/// ```
/// use protocol::encode_message;
///
/// let wire = encode_message(b"M105\n").unwrap();
/// assert_eq!(&wire[..4], &[0, 0, 0, 5]);
/// assert_eq!(&wire[4..], b"M105\n");
/// ```
pub fn encode_message(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: payload.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut wire = Vec::with_capacity(HEADER_SIZE + payload.len());
    wire.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    wire.extend_from_slice(payload);
    Ok(wire)
}

/// Write one message to a writer
pub fn write_message<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let wire = encode_message(payload)?;
    writer.write_all(&wire)?;
    writer.flush()?;
    Ok(())
}

/// Read one message from a blocking reader
///
/// End-of-stream before a complete message surfaces as an
/// `UnexpectedEof` I/O error.
pub fn read_message<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut len_bytes)?;
    let length = u32::from_be_bytes(len_bytes) as usize;

    if length > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: length,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

/// Incremental decoder for non-blocking readers
///
/// Bytes are pushed as they arrive; complete messages are popped in order.
#[derive(Debug, Default)]
pub struct MessageDecoder {
    buf: BytesMut,
}

impl MessageDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Feed raw bytes read from the channel
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete message, if any
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    pub fn next_message(&mut self) -> Result<Option<Bytes>> {
        if self.buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let length =
            u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;

        if length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: length,
                max: MAX_MESSAGE_SIZE,
            });
        }

        if self.buf.len() < HEADER_SIZE + length {
            return Ok(None);
        }

        self.buf.advance(HEADER_SIZE);
        Ok(Some(self.buf.split_to(length).freeze()))
    }

    /// Number of bytes buffered but not yet returned
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}
