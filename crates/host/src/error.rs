//! Host-side error types

use std::process::ExitStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Failed to start daemon '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Daemon exited during startup with {status} ({})", exit_reason(.status))]
    DaemonExited { status: ExitStatus },

    #[error("Handshake failed: {0}")]
    Handshake(#[source] common::Error),

    #[error("Channel error: {0}")]
    Channel(#[from] common::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Describe a daemon exit status using the daemon's exit code table
pub fn exit_reason(status: &ExitStatus) -> &'static str {
    match status.code() {
        Some(0) => "exited before the handshake",
        Some(2) => "unsupported device",
        Some(3) => "bulk endpoint not found",
        Some(4) => "unsupported baud rate",
        Some(5) => "handshake failure",
        Some(6) => "device open failure",
        Some(_) => "daemon error",
        None => "killed by signal",
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
