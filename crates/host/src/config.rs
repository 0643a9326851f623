//! Host configuration management
//!
//! Controls how the daemon is launched and how long the proxy waits on it.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub host: HostSettings,
    #[serde(default)]
    pub daemon: LaunchSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    pub log_level: String,
    /// Default `readline` wait
    pub read_timeout_secs: f64,
    /// Command printing a JSON array of port names
    ///
    /// e.g. `["termux-usb", "-l"]` on Android
    pub list_command: Option<Vec<String>>,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            read_timeout_secs: 1.0,
            list_command: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchSettings {
    /// Daemon executable
    pub program: String,
    /// Prefix placed before the daemon program, e.g. `["termux-usb", "-r", "-e"]`
    pub launcher: Vec<String>,
    /// Base directory for per-instance endpoint directories
    pub socket_dir: Option<PathBuf>,
    /// Bound on each handshake step
    pub handshake_timeout_secs: f64,
    /// Wait between SIGTERM and SIGKILL
    pub terminate_grace_ms: u64,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            program: "usb-serial-daemon".to_string(),
            launcher: Vec::new(),
            socket_dir: None,
            handshake_timeout_secs: 10.0,
            terminate_grace_ms: 500,
        }
    }
}

impl HostConfig {
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

        let config: HostConfig = toml::from_str(&content)
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
            config_dir.join("usb-serial-bridge").join("host.toml")
        } else {
            PathBuf::from(".config/usb-serial-bridge/host.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.host.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.host.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.daemon.program.trim().is_empty() {
            return Err(anyhow!("daemon.program must not be empty"));
        }

        for (name, value) in [
            ("host.read_timeout_secs", self.host.read_timeout_secs),
            ("daemon.handshake_timeout_secs", self.daemon.handshake_timeout_secs),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(anyhow!("{} must be a positive number of seconds", name));
            }
        }

        if let Some(command) = &self.host.list_command
            && command.is_empty()
        {
            return Err(anyhow!("host.list_command must name a program"));
        }

        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.host.read_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.daemon.handshake_timeout_secs)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.daemon.terminate_grace_ms)
    }

    /// Base directory for endpoint directories, with `~` expanded
    pub fn socket_dir(&self) -> PathBuf {
        match &self.daemon.socket_dir {
            Some(dir) => PathBuf::from(shellexpand::tilde(&dir.to_string_lossy()).as_ref()),
            None => common::default_socket_dir(),
        }
    }

    /// Launcher prefix followed by the daemon program
    pub fn daemon_command(&self) -> Vec<String> {
        self.daemon
            .launcher
            .iter()
            .cloned()
            .chain(std::iter::once(
                shellexpand::tilde(&self.daemon.program).into_owned(),
            ))
            .collect()
    }
}
