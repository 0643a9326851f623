//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Serialization error from postcard
    #[error("Serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    /// Message length exceeds maximum allowed size
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Unterminated line exceeded the accumulator bound and was discarded
    #[error("Line too long: {len} bytes without separator (max: {max})")]
    LineTooLong { len: usize, max: usize },

    /// I/O error during message operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_too_large_display() {
        let err = ProtocolError::MessageTooLarge {
            size: 10_000_000,
            max: 1_048_576,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Message too large"));
        assert!(msg.contains("10000000"));
    }

    #[test]
    fn test_line_too_long_display() {
        let err = ProtocolError::LineTooLong { len: 70_000, max: 65_536 };
        assert_eq!(
            err.to_string(),
            "Line too long: 70000 bytes without separator (max: 65536)"
        );
    }
}
