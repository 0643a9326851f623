//! Protocol version management

use serde::{Deserialize, Serialize};

/// Protocol version using semantic versioning
///
/// Carried in every handshake `Hello` so a host and a daemon built from
/// different releases refuse to talk instead of misreading each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

/// Current protocol version
pub const CURRENT_VERSION: ProtocolVersion = ProtocolVersion {
    major: 1,
    minor: 0,
    patch: 0,
};

impl ProtocolVersion {
    /// Check if a peer speaking `other` can be accepted by this side
    ///
    /// Major versions must match; minor and patch differences are tolerated.
    pub fn is_compatible_with(&self, other: &ProtocolVersion) -> bool {
        self.major == other.major
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
