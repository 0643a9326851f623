//! Line framing engine
//!
//! Turns the raw byte stream read from the USB device into discrete,
//! newline-terminated frames. The accumulator keeps whatever trails the last
//! separator until more bytes arrive.
//!
//! Invariants:
//! - a frame always ends with [`LINE_SEPARATOR`] and is never re-split
//! - after [`LineAccumulator::extract`] the retained remainder contains no separator
//! - frames come out in separator order, which is byte-arrival order

use crate::error::{ProtocolError, Result};
use bytes::{Bytes, BytesMut};

/// The single byte that terminates a frame
pub const LINE_SEPARATOR: u8 = b'\n';

/// Default bound for an unterminated line (64 KiB)
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Split a borrowed buffer into complete frames and the unterminated tail
///
/// Each frame includes its terminating separator.
///
/// # Example
/// ```
/// use protocol::split_lines;
///
/// let (frames, rest) = split_lines(b"ok\nT:21.0\npart");
/// assert_eq!(frames, vec![&b"ok\n"[..], &b"T:21.0\n"[..]]);
/// assert_eq!(rest, b"part");
/// ```
pub fn split_lines(buf: &[u8]) -> (Vec<&[u8]>, &[u8]) {
    let mut frames = Vec::new();
    let mut start = 0;

    for (i, &byte) in buf.iter().enumerate() {
        if byte == LINE_SEPARATOR {
            frames.push(&buf[start..=i]);
            start = i + 1;
        }
    }

    (frames, &buf[start..])
}

/// Accumulates inbound bytes and extracts separator-terminated frames
#[derive(Debug)]
pub struct LineAccumulator {
    buf: BytesMut,
    /// Maximum unterminated tail length (0 = unbounded)
    max_line_length: usize,
    /// Inside an overlong line: drop bytes through the next separator
    discarding: bool,
}

impl Default for LineAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl LineAccumulator {
    /// Create an accumulator bounded by [`DEFAULT_MAX_LINE_LENGTH`]
    pub fn new() -> Self {
        Self::with_max_line_length(DEFAULT_MAX_LINE_LENGTH)
    }

    /// Create an accumulator with a custom bound
    ///
    /// A bound of 0 disables the check.
    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
            max_line_length,
            discarding: false,
        }
    }

    /// Append newly received bytes
    ///
    /// If the bytes after the last separator now exceed the bound, that tail is
    /// dropped (complete lines stay buffered) and `LineTooLong` is returned.
    /// The rest of the overlong line is dropped as it arrives, up to and
    /// including its separator; framing resumes with the byte after it.
    pub fn accumulate(&mut self, mut bytes: &[u8]) -> Result<()> {
        if self.discarding {
            match bytes.iter().position(|&b| b == LINE_SEPARATOR) {
                Some(pos) => {
                    self.discarding = false;
                    bytes = &bytes[pos + 1..];
                }
                None => return Ok(()),
            }
        }

        if bytes.is_empty() {
            return Ok(());
        }

        self.buf.extend_from_slice(bytes);

        if self.max_line_length == 0 {
            return Ok(());
        }

        let complete = self
            .buf
            .iter()
            .rposition(|&b| b == LINE_SEPARATOR)
            .map_or(0, |pos| pos + 1);
        let tail = self.buf.len() - complete;

        if tail > self.max_line_length {
            self.buf.truncate(complete);
            self.discarding = true;
            return Err(ProtocolError::LineTooLong {
                len: tail,
                max: self.max_line_length,
            });
        }

        Ok(())
    }

    /// Whether the rest of an overlong line is still being dropped
    pub fn is_discarding(&self) -> bool {
        self.discarding
    }

    /// Extract every complete frame, in order
    ///
    /// The unterminated tail stays in the accumulator (see [`remainder`](Self::remainder)).
    pub fn extract(&mut self) -> Vec<Bytes> {
        let mut frames = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == LINE_SEPARATOR) {
            frames.push(self.buf.split_to(pos + 1).freeze());
        }

        frames
    }

    /// Bytes received but not yet terminated
    pub fn remainder(&self) -> &[u8] {
        &self.buf
    }

    /// Number of buffered bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Discard everything buffered
    pub fn clear(&mut self) {
        self.buf.clear();
        self.discarding = false;
    }

    /// Configured bound (0 = unbounded)
    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }
}
