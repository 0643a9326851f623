//! Wire-level building blocks for usb-serial-bridge
//!
//! This crate holds everything that is pure data transformation and has no
//! I/O of its own beyond `Read`/`Write` adapters:
//! - the line framing engine that splits raw device output into frames
//! - the length-prefixed message codec used on both local channels
//! - the handshake messages exchanged when a channel is established
//! - protocol versioning
//!
//! # Example
//!
//! ```
//! use protocol::LineAccumulator;
//!
//! let mut acc = LineAccumulator::new();
//! acc.accumulate(b"AB").unwrap();
//! acc.accumulate(b"CD\nEF").unwrap();
//!
//! let frames = acc.extract();
//! assert_eq!(frames.len(), 1);
//! assert_eq!(&frames[0][..], b"ABCD\n");
//! assert_eq!(acc.remainder(), b"EF");
//! ```
//!
//! # Channel Messages
//!
//! ```
//! use protocol::{MessageDecoder, encode_message};
//!
//! let wire = encode_message(b"G28\n").unwrap();
//!
//! let mut decoder = MessageDecoder::new();
//! decoder.push(&wire);
//! let payload = decoder.next_message().unwrap().unwrap();
//! assert_eq!(&payload[..], b"G28\n");
//! ```

pub mod codec;
pub mod error;
pub mod line;
pub mod messages;
pub mod version;

pub use codec::{
    HEADER_SIZE, MAX_MESSAGE_SIZE, MessageDecoder, encode_message, read_message, write_message,
};
pub use error::{ProtocolError, Result};
pub use line::{DEFAULT_MAX_LINE_LENGTH, LINE_SEPARATOR, LineAccumulator, split_lines};
pub use messages::{
    ChannelId, HANDSHAKE_TOKEN, HandshakeMessage, RejectReason, decode_handshake, encode_handshake,
};
pub use version::{CURRENT_VERSION, ProtocolVersion};
