//! Integration tests for channel establishment over real Unix sockets
//!
//! Covers:
//! - full dual-channel handshake with data flowing both ways
//! - rejection of impostor peers without giving up on the real one
//! - handshake timeout and abort
//! - end-of-stream detection after the handshake
//!
//! Run with: `cargo test -p common --test channel_tests`

use bytes::Bytes;
use common::{
    ChannelEndpoints, ChannelEvent, ChannelListener, Error, HostHandshake, establish_daemon_side,
};
use protocol::{
    CURRENT_VERSION, ChannelId, HandshakeMessage, RejectReason, decode_handshake,
    encode_handshake, read_message, write_message,
};
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

fn temp_endpoints() -> (tempfile::TempDir, ChannelEndpoints) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let endpoints = ChannelEndpoints::in_dir(dir.path());
    (dir, endpoints)
}

/// Send an arbitrary first message and return the listener's answer
fn raw_hello(path: &std::path::Path, hello: &HandshakeMessage) -> HandshakeMessage {
    let mut stream = UnixStream::connect(path).expect("Failed to connect");
    stream.set_read_timeout(Some(TIMEOUT)).unwrap();
    write_message(&mut stream, &encode_handshake(hello).unwrap()).unwrap();
    decode_handshake(&read_message(&mut stream).unwrap()).unwrap()
}

// ============================================================================
// Handshake
// ============================================================================

#[test]
fn test_full_handshake_and_traffic() {
    let (_dir, endpoints) = temp_endpoints();

    let host = HostHandshake::begin(&endpoints, TIMEOUT).expect("Failed to bind A");

    let daemon_endpoints = endpoints.clone();
    let daemon = thread::spawn(move || {
        let mut channels = establish_daemon_side(&daemon_endpoints, TIMEOUT).unwrap();

        // Echo one host message back, uppercased
        let ChannelEvent::Message(msg) = channels.host_to_daemon.recv_timeout(TIMEOUT).unwrap()
        else {
            panic!("Expected message on A");
        };
        channels
            .daemon_to_host
            .send(&msg.to_ascii_uppercase())
            .unwrap();

        // Then wait for the host to close A
        channels.host_to_daemon.recv_timeout(TIMEOUT).unwrap()
    });

    let mut channels = host.complete(|| None).expect("Handshake failed");
    channels.host_to_daemon.send(b"ok\n").unwrap();

    let event = channels.daemon_to_host.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(event, ChannelEvent::Message(Bytes::from_static(b"OK\n")));

    channels.host_to_daemon.shutdown().unwrap();
    assert_eq!(daemon.join().unwrap(), ChannelEvent::Closed);

    // Listener sockets are gone once the handshake completes
    assert!(!endpoints.host_to_daemon.exists());
    assert!(!endpoints.daemon_to_host.exists());
}

#[test]
fn test_impostor_rejected_then_real_peer_accepted() {
    let (_dir, endpoints) = temp_endpoints();
    let listener = ChannelListener::bind(&endpoints.host_to_daemon, ChannelId::HostToDaemon)
        .expect("Failed to bind");

    let path = endpoints.host_to_daemon.clone();
    let peers = thread::spawn(move || {
        let bad_token = raw_hello(
            &path,
            &HandshakeMessage::Hello {
                version: CURRENT_VERSION,
                token: "not-the-token".to_string(),
                channel: ChannelId::HostToDaemon,
            },
        );
        let wrong_channel = raw_hello(&path, &HandshakeMessage::hello(ChannelId::DaemonToHost));
        let real = raw_hello(&path, &HandshakeMessage::hello(ChannelId::HostToDaemon));
        (bad_token, wrong_channel, real)
    });

    let accepted = listener.accept(TIMEOUT, || None);
    let (bad_token, wrong_channel, real) = peers.join().unwrap();

    assert!(accepted.is_ok());
    assert_eq!(
        bad_token,
        HandshakeMessage::Reject {
            reason: RejectReason::BadToken
        }
    );
    assert_eq!(
        wrong_channel,
        HandshakeMessage::Reject {
            reason: RejectReason::WrongChannel {
                expected: ChannelId::HostToDaemon
            }
        }
    );
    assert_eq!(real, HandshakeMessage::Accept);
}

#[test]
fn test_accept_times_out_without_peer() {
    let (_dir, endpoints) = temp_endpoints();
    let host = HostHandshake::begin(&endpoints, Duration::from_millis(100)).unwrap();

    let start = Instant::now();
    let err = host.complete(|| None).unwrap_err();

    assert!(matches!(
        err,
        Error::HandshakeTimeout {
            channel: ChannelId::HostToDaemon,
            ..
        }
    ));
    assert!(err.is_handshake_failure());
    assert!(start.elapsed() >= Duration::from_millis(100));
}

#[test]
fn test_watch_aborts_accept() {
    let (_dir, endpoints) = temp_endpoints();
    let host = HostHandshake::begin(&endpoints, TIMEOUT).unwrap();

    let mut polls = 0;
    let start = Instant::now();
    let err = host
        .complete(|| {
            polls += 1;
            (polls > 3).then(|| "daemon exited".to_string())
        })
        .unwrap_err();

    assert!(matches!(err, Error::HandshakeAborted(ref reason) if reason == "daemon exited"));
    assert!(start.elapsed() < TIMEOUT);
}

#[test]
fn test_connect_times_out_without_listener() {
    let (_dir, endpoints) = temp_endpoints();

    let err = establish_daemon_side(&endpoints, Duration::from_millis(100)).unwrap_err();
    assert!(matches!(
        err,
        Error::HandshakeTimeout {
            channel: ChannelId::HostToDaemon,
            ..
        }
    ));
}

#[test]
fn test_stale_socket_file_replaced() {
    let (_dir, endpoints) = temp_endpoints();
    std::fs::write(&endpoints.host_to_daemon, b"stale").unwrap();

    let listener = ChannelListener::bind(&endpoints.host_to_daemon, ChannelId::HostToDaemon);
    assert!(listener.is_ok());
}
