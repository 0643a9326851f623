//! Serial-port-like proxy over a daemon subprocess
//!
//! [`HostProxy`] is what the host application holds instead of a serial
//! port. Opening it creates a private endpoint directory, spawns the daemon
//! and runs the host half of the handshake. After that, `write` and
//! `readline` never raise and never block beyond their bounds: once the
//! daemon is gone they return zero and empty.

use crate::config::HostConfig;
use crate::error::{ProxyError, Result};
use crate::process::{DaemonProcess, LaunchRequest};
use common::{
    ChannelEvent, ChannelReader, ChannelWriter, EndpointDir, HostHandshake, MAX_MESSAGE_SIZE,
};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct HostProxy {
    port: String,
    writer: Option<ChannelWriter>,
    reader: Option<ChannelReader>,
    daemon: Option<DaemonProcess>,
    endpoint_dir: Option<EndpointDir>,
    timeout: Duration,
    terminate_grace: Duration,
}

impl std::fmt::Debug for HostProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostProxy")
            .field("port", &self.port)
            .field("open", &self.is_open())
            .field("daemon", &self.daemon_id())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HostProxy {
    /// Spawn a daemon for `port` and connect to it
    pub fn open(config: &HostConfig, port: &str, baud: u32) -> Result<Self> {
        Self::with_launcher(config, port, baud, |request| {
            DaemonProcess::spawn(request).map(Some)
        })
    }

    /// Open with a custom daemon launcher
    ///
    /// `launch` is called once listener A is bound. It may return `None`
    /// when the daemon runs somewhere the proxy does not supervise.
    pub fn with_launcher<F>(config: &HostConfig, port: &str, baud: u32, launch: F) -> Result<Self>
    where
        F: FnOnce(&LaunchRequest) -> Result<Option<DaemonProcess>>,
    {
        let handshake_timeout = config.handshake_timeout();
        let terminate_grace = config.terminate_grace();

        let mut endpoint_dir = EndpointDir::create(&config.socket_dir(), port)?;
        let handshake =
            HostHandshake::begin(endpoint_dir.endpoints(), handshake_timeout).map_err(ProxyError::Handshake)?;

        let request = LaunchRequest {
            command: config.daemon_command(),
            port: port.to_string(),
            baud,
            endpoints: endpoint_dir.endpoints().clone(),
            handshake_timeout,
        };
        // On a launch error, dropping `handshake` and `endpoint_dir` unbinds A
        // and removes the directory
        let mut daemon = launch(&request)?;

        let result = handshake.complete(|| {
            let daemon = daemon.as_mut()?;
            match daemon.try_wait() {
                Ok(Some(status)) => Some(format!("daemon exited with {}", status)),
                Ok(None) => None,
                Err(e) => Some(format!("failed to poll daemon: {}", e)),
            }
        });

        match result {
            Ok(channels) => {
                info!("Bridge to {} open at {} baud", port, baud);
                Ok(Self {
                    port: port.to_string(),
                    writer: Some(channels.host_to_daemon),
                    reader: Some(channels.daemon_to_host),
                    daemon,
                    endpoint_dir: Some(endpoint_dir),
                    timeout: config.read_timeout(),
                    terminate_grace,
                })
            }
            Err(e) => {
                let exited = daemon
                    .as_mut()
                    .and_then(|d| d.try_wait().ok().flatten());

                if let Some(mut daemon) = daemon.take()
                    && let Err(err) = daemon.terminate(terminate_grace)
                {
                    warn!("Failed to stop daemon after handshake failure: {}", err);
                }
                endpoint_dir.remove();

                Err(match exited {
                    Some(status) => ProxyError::DaemonExited { status },
                    None => ProxyError::Handshake(e),
                })
            }
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// Whether the bridge is still usable
    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Daemon process id, if one is supervised
    pub fn daemon_id(&self) -> Option<u32> {
        self.daemon.as_ref().map(DaemonProcess::id)
    }

    /// Upper bound on each [`readline`](Self::readline) wait
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Send bytes to the device; returns how many were accepted
    ///
    /// Large writes go out as several channel messages. If one fails the
    /// proxy closes and the count covers only the messages already sent,
    /// so a short count (possibly 0) means the rest was lost.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let Some(writer) = self.writer.as_mut() else {
            return 0;
        };

        let mut sent = 0;
        for chunk in data.chunks(MAX_MESSAGE_SIZE) {
            if let Err(e) = writer.send(chunk) {
                warn!(
                    "Write to {} failed after {} of {} bytes, closing: {}",
                    self.port,
                    sent,
                    data.len(),
                    e
                );
                self.close();
                return sent;
            }
            sent += chunk.len();
        }
        sent
    }

    /// Next line from the device, or empty if none arrives within the timeout
    ///
    /// End of stream on channel B means the daemon is gone; the proxy closes
    /// itself and every later call returns empty.
    pub fn readline(&mut self) -> Vec<u8> {
        let Some(reader) = self.reader.as_mut() else {
            return Vec::new();
        };

        match reader.recv_timeout(self.timeout) {
            Ok(ChannelEvent::Message(frame)) => frame.to_vec(),
            Ok(ChannelEvent::Idle) => Vec::new(),
            Ok(ChannelEvent::Closed) => {
                info!("Daemon for {} closed its channel", self.port);
                self.close();
                Vec::new()
            }
            Err(e) => {
                warn!("Read from {} failed, closing: {}", self.port, e);
                self.close();
                Vec::new()
            }
        }
    }

    /// Close both channels, stop the daemon's process group and remove the
    /// endpoint directory
    ///
    /// Safe to call any number of times.
    pub fn close(&mut self) {
        if let Some(writer) = self.writer.take()
            && let Err(e) = writer.shutdown()
        {
            debug!("Channel A shutdown: {}", e);
        }
        self.reader = None;

        if let Some(mut daemon) = self.daemon.take()
            && let Err(e) = daemon.terminate(self.terminate_grace)
        {
            warn!("Failed to stop daemon for {}: {}", self.port, e);
        }

        if let Some(mut dir) = self.endpoint_dir.take() {
            dir.remove();
            info!("Bridge to {} closed", self.port);
        }
    }
}

impl Drop for HostProxy {
    fn drop(&mut self) {
        self.close();
    }
}
