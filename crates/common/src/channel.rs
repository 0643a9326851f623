//! Local message channels between host and daemon
//!
//! A channel is a Unix stream socket carrying length-prefixed messages.
//! Every connection starts with a Hello/Accept exchange; see
//! [`protocol::HandshakeMessage`]. After that one side only writes and the
//! other only reads.
//!
//! Readers are non-blocking so the daemon can poll its inbound channel in
//! the same loop that polls the USB device.

use crate::{Error, Result};
use bytes::Bytes;
use protocol::{
    ChannelId, HandshakeMessage, MAX_MESSAGE_SIZE, MessageDecoder, ProtocolError,
    decode_handshake, encode_handshake, read_message, write_message,
};
use std::io::{ErrorKind, Read};
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Sleep between non-blocking accept attempts
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Sleep between connect attempts while the listener is not up yet
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// Default bound on a single blocking message write
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Map an I/O failure during the handshake to a handshake error
fn handshake_error(err: ProtocolError, channel: ChannelId, timeout: Duration) -> Error {
    match err {
        ProtocolError::Io(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
            Error::HandshakeTimeout { channel, timeout }
        }
        ProtocolError::Io(e) if e.kind() == ErrorKind::UnexpectedEof => Error::Channel(format!(
            "Peer closed channel {} during handshake",
            channel
        )),
        other => Error::Protocol(other),
    }
}

/// Remaining time until `deadline`, never zero
///
/// Socket timeouts reject a zero duration.
fn remaining(deadline: Instant) -> Duration {
    deadline
        .saturating_duration_since(Instant::now())
        .max(Duration::from_millis(1))
}

// ============================================================================
// Listener (accepting side)
// ============================================================================

/// Listening endpoint of one channel
///
/// The socket file is removed when the listener is dropped.
#[derive(Debug)]
pub struct ChannelListener {
    listener: UnixListener,
    path: PathBuf,
    channel: ChannelId,
}

impl ChannelListener {
    /// Bind the listener for `channel` at `path`
    ///
    /// A stale socket file left at `path` is replaced.
    pub fn bind(path: &Path, channel: ChannelId) -> Result<Self> {
        match std::fs::remove_file(path) {
            Ok(()) => debug!("Removed stale socket {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let listener = UnixListener::bind(path).map_err(|e| {
            Error::Channel(format!(
                "Failed to bind channel {} at {}: {}",
                channel,
                path.display(),
                e
            ))
        })?;
        listener.set_nonblocking(true)?;

        debug!("Channel {} listening at {}", channel, path.display());

        Ok(Self {
            listener,
            path: path.to_path_buf(),
            channel,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Accept the peer of this channel
    ///
    /// Connections whose Hello is invalid get a Reject and are dropped; the
    /// listener keeps accepting until a valid peer arrives or `timeout`
    /// elapses. `watch` runs between attempts and aborts the accept when it
    /// returns a reason.
    pub fn accept<F>(&self, timeout: Duration, mut watch: F) -> Result<UnixStream>
    where
        F: FnMut() -> Option<String>,
    {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(reason) = watch() {
                return Err(Error::HandshakeAborted(reason));
            }

            match self.listener.accept() {
                Ok((stream, _)) => match self.verify_peer(&stream, deadline, timeout) {
                    Ok(()) => {
                        debug!("Channel {} established", self.channel);
                        return Ok(stream);
                    }
                    Err(e) => warn!("Dropped connection on channel {}: {}", self.channel, e),
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            if Instant::now() >= deadline {
                return Err(Error::HandshakeTimeout {
                    channel: self.channel,
                    timeout,
                });
            }
            std::thread::sleep(ACCEPT_POLL_INTERVAL);
        }
    }

    /// Read the peer's Hello and answer it
    fn verify_peer(&self, stream: &UnixStream, deadline: Instant, timeout: Duration) -> Result<()> {
        let mut stream = stream;
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(remaining(deadline)))?;

        let payload =
            read_message(&mut stream).map_err(|e| handshake_error(e, self.channel, timeout))?;

        let verdict = decode_handshake(&payload)
            .map_err(|_| protocol::RejectReason::UnexpectedMessage)
            .and_then(|msg| msg.validate_hello(self.channel));

        match verdict {
            Ok(()) => {
                write_message(&mut stream, &encode_handshake(&HandshakeMessage::Accept)?)?;
                stream.set_read_timeout(None)?;
                Ok(())
            }
            Err(reason) => {
                let reject = HandshakeMessage::Reject {
                    reason: reason.clone(),
                };
                // The peer may already be gone
                if let Err(e) = write_message(&mut stream, &encode_handshake(&reject)?) {
                    trace!("Failed to send reject: {}", e);
                }
                Err(Error::HandshakeRejected {
                    channel: self.channel,
                    reason,
                })
            }
        }
    }
}

impl Drop for ChannelListener {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to remove socket {}: {}", self.path.display(), e);
            }
        }
    }
}

// ============================================================================
// Connecting side
// ============================================================================

/// Connect to the listener of `channel` and complete its handshake
///
/// The listener may not exist yet; connection attempts are retried until
/// `timeout` elapses.
pub fn connect_channel(path: &Path, channel: ChannelId, timeout: Duration) -> Result<UnixStream> {
    let deadline = Instant::now() + timeout;

    let mut stream = loop {
        match UnixStream::connect(path) {
            Ok(stream) => break stream,
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused) => {
                if Instant::now() >= deadline {
                    return Err(Error::HandshakeTimeout { channel, timeout });
                }
                std::thread::sleep(CONNECT_RETRY_INTERVAL);
            }
            Err(e) => {
                return Err(Error::Channel(format!(
                    "Failed to connect channel {} at {}: {}",
                    channel,
                    path.display(),
                    e
                )));
            }
        }
    };

    stream.set_read_timeout(Some(remaining(deadline)))?;
    stream.set_write_timeout(Some(remaining(deadline)))?;

    write_message(&mut stream, &encode_handshake(&HandshakeMessage::hello(channel))?)
        .map_err(|e| handshake_error(e, channel, timeout))?;

    let reply = read_message(&mut stream).map_err(|e| handshake_error(e, channel, timeout))?;

    match decode_handshake(&reply)? {
        HandshakeMessage::Accept => {
            stream.set_read_timeout(None)?;
            stream.set_write_timeout(None)?;
            debug!("Channel {} connected", channel);
            Ok(stream)
        }
        HandshakeMessage::Reject { reason } => Err(Error::HandshakeRejected { channel, reason }),
        HandshakeMessage::Hello { .. } => Err(Error::Channel(format!(
            "Unexpected Hello from listener of channel {}",
            channel
        ))),
    }
}

// ============================================================================
// Established channels
// ============================================================================

/// Outcome of polling a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// One complete message
    Message(Bytes),
    /// Nothing available right now
    Idle,
    /// Peer closed the channel; every earlier message has been returned
    Closed,
}

/// Reading end of an established channel
#[derive(Debug)]
pub struct ChannelReader {
    stream: UnixStream,
    channel: ChannelId,
    decoder: MessageDecoder,
    buf: Vec<u8>,
    eof: bool,
}

impl ChannelReader {
    pub fn new(stream: UnixStream, channel: ChannelId) -> Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self {
            stream,
            channel,
            decoder: MessageDecoder::new(),
            buf: vec![0u8; READ_BUFFER_SIZE],
            eof: false,
        })
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Return the next message without blocking
    pub fn poll(&mut self) -> Result<ChannelEvent> {
        loop {
            if let Some(msg) = self.decoder.next_message()? {
                return Ok(ChannelEvent::Message(msg));
            }
            if self.eof {
                if self.decoder.buffered() > 0 {
                    debug!(
                        "Channel {} closed with {} bytes of a partial message",
                        self.channel,
                        self.decoder.buffered()
                    );
                }
                return Ok(ChannelEvent::Closed);
            }

            match self.stream.read(&mut self.buf) {
                Ok(0) => self.eof = true,
                Ok(n) => self.decoder.push(&self.buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(ChannelEvent::Idle),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if e.kind() == ErrorKind::ConnectionReset => self.eof = true,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Wait up to `timeout` for the next message
    ///
    /// Returns [`ChannelEvent::Idle`] when nothing arrived in time.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<ChannelEvent> {
        let deadline = Instant::now() + timeout;

        loop {
            match self.poll()? {
                ChannelEvent::Idle => {}
                event => return Ok(event),
            }
            if Instant::now() >= deadline {
                return Ok(ChannelEvent::Idle);
            }
            self.wait_readable(remaining(deadline))?;
        }
    }

    /// Block for at most `timeout` until some bytes arrive
    fn wait_readable(&mut self, timeout: Duration) -> Result<()> {
        self.stream.set_nonblocking(false)?;
        self.stream.set_read_timeout(Some(timeout))?;
        let result = self.stream.read(&mut self.buf);
        self.stream.set_read_timeout(None)?;
        self.stream.set_nonblocking(true)?;

        match result {
            Ok(0) => self.eof = true,
            Ok(n) => self.decoder.push(&self.buf[..n]),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) => {}
            Err(e) if e.kind() == ErrorKind::ConnectionReset => self.eof = true,
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

/// Writing end of an established channel
#[derive(Debug)]
pub struct ChannelWriter {
    stream: UnixStream,
    channel: ChannelId,
}

impl ChannelWriter {
    pub fn new(stream: UnixStream, channel: ChannelId) -> Result<Self> {
        Self::with_write_timeout(stream, channel, DEFAULT_WRITE_TIMEOUT)
    }

    pub fn with_write_timeout(
        stream: UnixStream,
        channel: ChannelId,
        timeout: Duration,
    ) -> Result<Self> {
        stream.set_nonblocking(false)?;
        stream.set_write_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        Ok(Self { stream, channel })
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Bound each blocking message write by `timeout`
    ///
    /// A write that cannot finish in time (the peer stopped reading) fails
    /// with a channel error.
    pub fn set_write_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.stream
            .set_write_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        Ok(())
    }

    /// Send `payload` as one message
    ///
    /// Payloads over the message limit go out as several consecutive
    /// messages. An empty payload sends nothing.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        for chunk in payload.chunks(MAX_MESSAGE_SIZE) {
            write_message(&mut self.stream, chunk).map_err(|e| match e {
                ProtocolError::Io(io)
                    if matches!(
                        io.kind(),
                        ErrorKind::BrokenPipe
                            | ErrorKind::ConnectionReset
                            | ErrorKind::NotConnected
                    ) =>
                {
                    Error::ChannelClosed(self.channel)
                }
                ProtocolError::Io(io)
                    if matches!(io.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    Error::Channel(format!("Write on channel {} timed out", self.channel))
                }
                other => Error::Protocol(other),
            })?;
        }
        Ok(())
    }

    /// Signal end of stream to the peer
    pub fn shutdown(&self) -> Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn established_pair() -> (ChannelWriter, ChannelReader) {
        let (a, b) = UnixStream::pair().unwrap();
        (
            ChannelWriter::new(a, ChannelId::HostToDaemon).unwrap(),
            ChannelReader::new(b, ChannelId::HostToDaemon).unwrap(),
        )
    }

    #[test]
    fn test_poll_idle_then_message() {
        let (mut writer, mut reader) = established_pair();
        assert_eq!(reader.poll().unwrap(), ChannelEvent::Idle);

        writer.send(b"M105\n").unwrap();
        let event = reader.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(event, ChannelEvent::Message(Bytes::from_static(b"M105\n")));
    }

    #[test]
    fn test_empty_payload_sends_nothing() {
        let (mut writer, mut reader) = established_pair();
        writer.send(b"").unwrap();
        assert_eq!(reader.poll().unwrap(), ChannelEvent::Idle);
    }

    #[test]
    fn test_messages_before_close_are_delivered() {
        let (mut writer, mut reader) = established_pair();
        writer.send(b"one\n").unwrap();
        writer.send(b"two\n").unwrap();
        drop(writer);

        let timeout = Duration::from_secs(1);
        assert_eq!(
            reader.recv_timeout(timeout).unwrap(),
            ChannelEvent::Message(Bytes::from_static(b"one\n"))
        );
        assert_eq!(
            reader.recv_timeout(timeout).unwrap(),
            ChannelEvent::Message(Bytes::from_static(b"two\n"))
        );
        assert_eq!(reader.recv_timeout(timeout).unwrap(), ChannelEvent::Closed);
        assert_eq!(reader.poll().unwrap(), ChannelEvent::Closed);
    }

    #[test]
    fn test_recv_timeout_expires() {
        let (_writer, mut reader) = established_pair();
        let start = Instant::now();
        let event = reader.recv_timeout(Duration::from_millis(50)).unwrap();
        assert_eq!(event, ChannelEvent::Idle);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_oversized_write_is_split() {
        let (mut writer, mut reader) = established_pair();
        let payload = vec![b'x'; MAX_MESSAGE_SIZE + 10];

        let handle = std::thread::spawn(move || {
            writer.send(&payload).unwrap();
            writer
        });

        let timeout = Duration::from_secs(5);
        let ChannelEvent::Message(first) = reader.recv_timeout(timeout).unwrap() else {
            panic!("Expected first part");
        };
        let ChannelEvent::Message(second) = reader.recv_timeout(timeout).unwrap() else {
            panic!("Expected second part");
        };
        handle.join().unwrap();

        assert_eq!(first.len(), MAX_MESSAGE_SIZE);
        assert_eq!(second.len(), 10);
    }

    #[test]
    fn test_write_timeout_when_peer_stops_reading() {
        let (mut writer, _reader) = established_pair();
        writer.set_write_timeout(Duration::from_millis(50)).unwrap();

        let start = Instant::now();
        let err = writer.send(&vec![b'x'; 4 * MAX_MESSAGE_SIZE]).unwrap_err();
        assert!(matches!(err, Error::Channel(_)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_send_after_peer_closed() {
        let (mut writer, reader) = established_pair();
        drop(reader);

        let err = writer.send(b"G28\n").unwrap_err();
        assert!(matches!(err, Error::ChannelClosed(ChannelId::HostToDaemon)));
    }
}
