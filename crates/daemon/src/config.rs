//! Daemon configuration management
//!
//! All settings are optional; the file only tunes transfer bounds and
//! framing. Baud rate, device and channel endpoints always come from the
//! command line or the environment set by the host.

use crate::bridge::BridgeSettings;
use crate::usb::TransportSettings;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub daemon: DaemonSettings,
    #[serde(default)]
    pub usb: UsbSettings,
    #[serde(default)]
    pub framing: FramingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    pub log_level: String,
    /// Bound on each handshake step
    pub handshake_timeout_secs: u64,
    /// How long device output may wait on a host that is not reading
    pub host_write_timeout_ms: u64,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            handshake_timeout_secs: 10,
            host_write_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsbSettings {
    /// Steady-state bulk IN timeout
    pub read_timeout_ms: u64,
    pub read_chunk_size: usize,
    pub purge_chunk_size: usize,
    pub write_timeout_ms: u64,
    pub control_timeout_ms: u64,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            read_timeout_ms: 1,
            read_chunk_size: 1024,
            purge_chunk_size: 64,
            write_timeout_ms: 1000,
            control_timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FramingSettings {
    /// Longest unterminated line kept (0 = unbounded)
    pub max_line_length: usize,
}

impl Default for FramingSettings {
    fn default() -> Self {
        Self {
            max_line_length: protocol::DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref()),
            None => {
                let default = Self::default_path();
                if !default.exists() {
                    return Err(anyhow!("No configuration file found, using defaults"));
                }
                default
            }
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: DaemonConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-serial-bridge").join("daemon.toml")
        } else {
            PathBuf::from(".config/usb-serial-bridge/daemon.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.daemon.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.daemon.log_level,
                valid_levels.join(", ")
            ));
        }

        // libusb treats a zero timeout as "wait forever"
        for (name, value) in [
            ("usb.read_timeout_ms", self.usb.read_timeout_ms),
            ("usb.write_timeout_ms", self.usb.write_timeout_ms),
            ("usb.control_timeout_ms", self.usb.control_timeout_ms),
            ("daemon.handshake_timeout_secs", self.daemon.handshake_timeout_secs),
            ("daemon.host_write_timeout_ms", self.daemon.host_write_timeout_ms),
        ] {
            if value == 0 {
                return Err(anyhow!("{} must be greater than zero", name));
            }
        }

        if self.usb.read_chunk_size == 0 || self.usb.purge_chunk_size == 0 {
            return Err(anyhow!("USB chunk sizes must be greater than zero"));
        }

        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.daemon.handshake_timeout_secs)
    }

    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            write_timeout: Duration::from_millis(self.usb.write_timeout_ms),
            control_timeout: Duration::from_millis(self.usb.control_timeout_ms),
            purge_chunk_size: self.usb.purge_chunk_size,
        }
    }

    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            read_timeout: Duration::from_millis(self.usb.read_timeout_ms),
            read_chunk_size: self.usb.read_chunk_size,
            max_line_length: self.framing.max_line_length,
            host_write_timeout: Duration::from_millis(self.daemon.host_write_timeout_ms),
        }
    }
}
