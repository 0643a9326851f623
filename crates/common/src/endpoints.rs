//! Per-instance channel endpoints
//!
//! Each bridge gets its own private directory holding the two socket paths,
//! so several bridges can run side by side. The host creates the directory,
//! hands both paths to the daemon through its environment, and removes the
//! directory when the bridge closes.
//!
//! Unix socket paths are limited to about 100 bytes, so the base directory
//! should be short (the runtime dir or `/tmp`).

use crate::{Error, Result};
use protocol::ChannelId;
use std::ffi::OsString;
use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Path of listener A (host listens, daemon connects)
pub const ENV_CHANNEL_A: &str = "USB_SERIAL_CHANNEL_A";
/// Path of listener B (daemon listens, host connects)
pub const ENV_CHANNEL_B: &str = "USB_SERIAL_CHANNEL_B";
/// Baud rate requested by the host
pub const ENV_BAUDRATE: &str = "USB_SERIAL_BAUDRATE";
/// Handshake bound in milliseconds
pub const ENV_HANDSHAKE_TIMEOUT_MS: &str = "USB_SERIAL_HANDSHAKE_TIMEOUT_MS";

const SOCKET_A: &str = "a.sock";
const SOCKET_B: &str = "b.sock";
const MAX_PORT_LABEL: usize = 24;

/// The two socket paths of one bridge instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEndpoints {
    /// Channel A listener path
    pub host_to_daemon: PathBuf,
    /// Channel B listener path
    pub daemon_to_host: PathBuf,
}

impl ChannelEndpoints {
    pub fn new(host_to_daemon: impl Into<PathBuf>, daemon_to_host: impl Into<PathBuf>) -> Self {
        Self {
            host_to_daemon: host_to_daemon.into(),
            daemon_to_host: daemon_to_host.into(),
        }
    }

    /// Endpoints laid out inside `dir`
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(SOCKET_A), dir.join(SOCKET_B))
    }

    /// Listener path for a channel
    pub fn path(&self, channel: ChannelId) -> &Path {
        match channel {
            ChannelId::HostToDaemon => &self.host_to_daemon,
            ChannelId::DaemonToHost => &self.daemon_to_host,
        }
    }

    /// Environment entries that hand these endpoints to the daemon
    pub fn env_vars(&self) -> Vec<(&'static str, OsString)> {
        vec![
            (ENV_CHANNEL_A, self.host_to_daemon.clone().into_os_string()),
            (ENV_CHANNEL_B, self.daemon_to_host.clone().into_os_string()),
        ]
    }

    /// Read endpoints from the daemon's environment
    pub fn from_env() -> Result<Self> {
        let a = std::env::var_os(ENV_CHANNEL_A)
            .ok_or_else(|| Error::Config(format!("{} is not set", ENV_CHANNEL_A)))?;
        let b = std::env::var_os(ENV_CHANNEL_B)
            .ok_or_else(|| Error::Config(format!("{} is not set", ENV_CHANNEL_B)))?;
        Ok(Self::new(a, b))
    }
}

/// Default base directory for endpoint directories
pub fn default_socket_dir() -> PathBuf {
    dirs::runtime_dir().unwrap_or_else(std::env::temp_dir)
}

/// Reduce a port identifier to a filesystem-safe label
fn port_label(port: &str) -> String {
    let label: String = port
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_PORT_LABEL)
        .collect();

    if label.is_empty() {
        "port".to_string()
    } else {
        label
    }
}

/// Private directory owning one instance's endpoints
///
/// Removed on [`remove`](Self::remove) or drop.
#[derive(Debug)]
pub struct EndpointDir {
    dir: PathBuf,
    endpoints: ChannelEndpoints,
    removed: bool,
}

impl EndpointDir {
    /// Create `base/usb-serial-<port>-<random>` with mode 0700
    pub fn create(base: &Path, port: &str) -> Result<Self> {
        let suffix: u32 = rand::random();
        let dir = base.join(format!("usb-serial-{}-{:08x}", port_label(port), suffix));

        DirBuilder::new()
            .recursive(false)
            .mode(0o700)
            .create(&dir)
            .map_err(|e| {
                Error::Channel(format!(
                    "Failed to create endpoint directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;

        debug!("Created endpoint directory {}", dir.display());

        Ok(Self {
            endpoints: ChannelEndpoints::in_dir(&dir),
            dir,
            removed: false,
        })
    }

    pub fn endpoints(&self) -> &ChannelEndpoints {
        &self.endpoints
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Remove the directory and any socket files left in it
    ///
    /// Safe to call more than once.
    pub fn remove(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;

        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "Failed to remove endpoint directory {}: {}",
                    self.dir.display(),
                    e
                );
            }
        } else {
            debug!("Removed endpoint directory {}", self.dir.display());
        }
    }
}

impl Drop for EndpointDir {
    fn drop(&mut self) {
        self.remove();
    }
}
