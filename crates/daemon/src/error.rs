//! Daemon error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Unsupported device {vendor_id:04x}:{product_id:04x}: no serial driver matches")]
    DeviceUnsupported { vendor_id: u16, product_id: u16 },

    #[error("Bulk {direction} endpoint not found on interface {interface}")]
    EndpointNotFound {
        interface: u8,
        direction: &'static str,
    },

    #[error("Unsupported baud rate {0}")]
    UnsupportedBaudRate(u32),

    #[error("USB transfer timed out")]
    TransferTimeout,

    #[error("Invalid device reference '{0}' (expected fd:<n>, <n>, <bus>-<address> or <vid>:<pid>)")]
    InvalidDeviceRef(String),

    #[error("Failed to open device {device}: {source}")]
    DeviceOpen {
        device: String,
        #[source]
        source: rusb::Error,
    },

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("Handshake failed: {0}")]
    Handshake(#[source] common::Error),

    #[error("Channel error: {0}")]
    Channel(#[from] common::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DaemonError {
    /// Process exit status reported for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            DaemonError::DeviceUnsupported { .. } => 2,
            DaemonError::EndpointNotFound { .. } => 3,
            DaemonError::UnsupportedBaudRate(_) => 4,
            DaemonError::Handshake(_) => 5,
            DaemonError::DeviceOpen { .. } | DaemonError::InvalidDeviceRef(_) => 6,
            _ => 1,
        }
    }
}

/// Map a rusb error, folding timeouts into [`DaemonError::TransferTimeout`]
pub fn map_rusb_error(err: rusb::Error) -> DaemonError {
    match err {
        rusb::Error::Timeout => DaemonError::TransferTimeout,
        other => DaemonError::Usb(other),
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let cases = [
            (
                DaemonError::DeviceUnsupported {
                    vendor_id: 0x1234,
                    product_id: 0x5678,
                },
                2,
            ),
            (
                DaemonError::EndpointNotFound {
                    interface: 1,
                    direction: "IN",
                },
                3,
            ),
            (DaemonError::UnsupportedBaudRate(57600), 4),
            (
                DaemonError::Handshake(common::Error::HandshakeAborted("x".into())),
                5,
            ),
            (DaemonError::InvalidDeviceRef("?".into()), 6),
            (DaemonError::TransferTimeout, 1),
            (DaemonError::Usb(rusb::Error::NoDevice), 1),
        ];

        for (err, code) in cases {
            assert_eq!(err.exit_code(), code, "{}", err);
        }
    }

    #[test]
    fn test_unsupported_device_message_has_ids() {
        let err = DaemonError::DeviceUnsupported {
            vendor_id: 0x0403,
            product_id: 0x6001,
        };
        assert!(err.to_string().contains("0403:6001"));
    }

    #[test]
    fn test_map_rusb_timeout() {
        assert!(matches!(
            map_rusb_error(rusb::Error::Timeout),
            DaemonError::TransferTimeout
        ));
        assert!(matches!(
            map_rusb_error(rusb::Error::Pipe),
            DaemonError::Usb(rusb::Error::Pipe)
        ));
    }
}
