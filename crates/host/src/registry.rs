//! Registry of recognized serial ports
//!
//! One registry per process. It is refreshed from a listing command (e.g.
//! `termux-usb -l`) and gates which ports the proxy will open.

use crate::config::HostConfig;
use crate::error::{ProxyError, Result};
use crate::proxy::HostProxy;
use serde::Deserialize;
use std::process::{Command, Stdio};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

/// One entry of a port listing
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortEntry {
    Name(String),
    Number(i64),
}

impl From<PortEntry> for String {
    fn from(entry: PortEntry) -> Self {
        match entry {
            PortEntry::Name(name) => name,
            PortEntry::Number(n) => n.to_string(),
        }
    }
}

/// Parse a JSON array of port names or numbers
pub fn parse_port_list(json: &str) -> Result<Vec<String>> {
    let entries: Vec<PortEntry> = serde_json::from_str(json)
        .map_err(|e| ProxyError::Config(format!("Invalid port list: {}", e)))?;
    Ok(entries.into_iter().map(String::from).collect())
}

#[derive(Debug, Default)]
pub struct PortRegistry {
    ports: RwLock<Vec<String>>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ports<I, S>(ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let registry = Self::new();
        registry.refresh(ports);
        registry
    }

    /// Replace the recognized ports
    pub fn refresh<I, S>(&self, ports: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ports: Vec<String> = ports.into_iter().map(Into::into).collect();
        debug!("Recognized ports: {:?}", ports);
        *self.ports.write().unwrap_or_else(PoisonError::into_inner) = ports;
    }

    /// Run `argv` and replace the recognized ports with its JSON output
    ///
    /// Returns the number of ports found. The registry is unchanged on error.
    pub fn refresh_from_command(&self, argv: &[String]) -> Result<usize> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| ProxyError::Config("Empty port listing command".to_string()))?;

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .map_err(|source| ProxyError::Spawn {
                program: argv.join(" "),
                source,
            })?;

        if !output.status.success() {
            return Err(ProxyError::Config(format!(
                "Port listing command '{}' failed with {}",
                argv.join(" "),
                output.status
            )));
        }

        let ports = parse_port_list(&String::from_utf8_lossy(&output.stdout))?;
        let count = ports.len();
        self.refresh(ports);
        info!("Found {} port(s) via '{}'", count, argv.join(" "));
        Ok(count)
    }

    pub fn ports(&self) -> Vec<String> {
        self.ports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn contains(&self, port: &str) -> bool {
        self.ports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|p| p == port)
    }

    /// Open a proxy for a recognized port
    ///
    /// `None` means the port is not ours and another transport should
    /// handle it.
    pub fn open(&self, port: &str, baud: u32, config: &HostConfig) -> Option<Result<HostProxy>> {
        if !self.contains(port) {
            debug!("Port {} not recognized", port);
            return None;
        }
        Some(HostProxy::open(config, port, baud))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port_list() {
        assert_eq!(
            parse_port_list(r#"["/dev/bus/usb/001/004", 1003]"#).unwrap(),
            vec!["/dev/bus/usb/001/004", "1003"]
        );
        assert!(parse_port_list("[]").unwrap().is_empty());
        assert!(parse_port_list("not json").is_err());
        assert!(parse_port_list(r#"{"port": 1}"#).is_err());
        assert!(parse_port_list("[true]").is_err());
    }

    #[test]
    fn test_refresh_replaces_ports() {
        let registry = PortRegistry::with_ports(["a", "b"]);
        assert!(registry.contains("a"));

        registry.refresh(["c"]);
        assert!(!registry.contains("a"));
        assert_eq!(registry.ports(), vec!["c"]);
    }

    #[test]
    fn test_unrecognized_port_is_not_opened() {
        let registry = PortRegistry::with_ports(["/dev/bus/usb/001/004"]);
        assert!(
            registry
                .open("/dev/ttyUSB0", 115200, &HostConfig::default())
                .is_none()
        );
    }

    #[test]
    fn test_refresh_from_command() {
        let registry = PortRegistry::new();
        let argv = ["echo", r#"["/dev/bus/usb/002/003", 7]"#].map(String::from);

        assert_eq!(registry.refresh_from_command(&argv).unwrap(), 2);
        assert!(registry.contains("/dev/bus/usb/002/003"));
        assert!(registry.contains("7"));
    }

    #[test]
    fn test_failed_command_keeps_ports() {
        let registry = PortRegistry::with_ports(["keep"]);

        assert!(registry.refresh_from_command(&["false".to_string()]).is_err());
        assert!(registry.refresh_from_command(&[]).is_err());
        assert!(
            registry
                .refresh_from_command(&["echo".to_string(), "garbage".to_string()])
                .is_err()
        );
        assert_eq!(registry.ports(), vec!["keep"]);
    }
}
