//! Dual-channel handshake
//!
//! Establishment order:
//!
//! ```text
//! host                              daemon
//! ----                              ------
//! bind A
//! spawn daemon  ------------------>
//!                                   bind B
//!                 <--- Hello(A) --- connect A
//! accept A        --- Accept --->
//!                                   accept B
//! connect B       --- Hello(B) --->
//!                 <--- Accept ----
//! ```
//!
//! Each accept and connect step is bounded by the handshake timeout.

use crate::channel::{ChannelListener, ChannelReader, ChannelWriter, connect_channel};
use crate::endpoints::ChannelEndpoints;
use crate::Result;
use protocol::ChannelId;
use std::time::Duration;
use tracing::info;

/// Channels held by the daemon once the handshake is done
#[derive(Debug)]
pub struct DaemonChannels {
    /// Channel A, read side
    pub host_to_daemon: ChannelReader,
    /// Channel B, write side
    pub daemon_to_host: ChannelWriter,
}

/// Channels held by the host once the handshake is done
#[derive(Debug)]
pub struct HostChannels {
    /// Channel A, write side
    pub host_to_daemon: ChannelWriter,
    /// Channel B, read side
    pub daemon_to_host: ChannelReader,
}

/// Run the daemon's half of the handshake
pub fn establish_daemon_side(endpoints: &ChannelEndpoints, timeout: Duration) -> Result<DaemonChannels> {
    let listener_b = ChannelListener::bind(&endpoints.daemon_to_host, ChannelId::DaemonToHost)?;

    let stream_a = connect_channel(&endpoints.host_to_daemon, ChannelId::HostToDaemon, timeout)?;
    let stream_b = listener_b.accept(timeout, || None)?;

    info!("Handshake complete on both channels");

    Ok(DaemonChannels {
        host_to_daemon: ChannelReader::new(stream_a, ChannelId::HostToDaemon)?,
        daemon_to_host: ChannelWriter::new(stream_b, ChannelId::DaemonToHost)?,
    })
}

/// Host half of the handshake, split around the daemon spawn
///
/// [`begin`](Self::begin) binds listener A before the daemon starts so the
/// daemon never races the bind; [`complete`](Self::complete) finishes once
/// the daemon is running.
#[derive(Debug)]
pub struct HostHandshake {
    listener_a: ChannelListener,
    endpoints: ChannelEndpoints,
    timeout: Duration,
}

impl HostHandshake {
    pub fn begin(endpoints: &ChannelEndpoints, timeout: Duration) -> Result<Self> {
        let listener_a = ChannelListener::bind(&endpoints.host_to_daemon, ChannelId::HostToDaemon)?;
        Ok(Self {
            listener_a,
            endpoints: endpoints.clone(),
            timeout,
        })
    }

    pub fn endpoints(&self) -> &ChannelEndpoints {
        &self.endpoints
    }

    /// Accept A, then connect B
    ///
    /// `watch` is polled while waiting on A; returning a reason (typically
    /// "daemon exited") aborts the handshake immediately.
    pub fn complete<F>(self, watch: F) -> Result<HostChannels>
    where
        F: FnMut() -> Option<String>,
    {
        let stream_a = self.listener_a.accept(self.timeout, watch)?;
        let stream_b = connect_channel(
            &self.endpoints.daemon_to_host,
            ChannelId::DaemonToHost,
            self.timeout,
        )?;

        info!("Handshake complete on both channels");

        Ok(HostChannels {
            host_to_daemon: ChannelWriter::new(stream_a, ChannelId::HostToDaemon)?,
            daemon_to_host: ChannelReader::new(stream_b, ChannelId::DaemonToHost)?,
        })
    }
}
