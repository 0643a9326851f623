//! Test utilities for usb-serial-bridge
//!
//! Shared helpers for the daemon and host test suites. Enabled with the
//! `test-utils` feature.
//!
//! # Example
//!
//! ```
//! use common::test_utils::temp_endpoints;
//!
//! let (_dir, endpoints) = temp_endpoints();
//! assert!(endpoints.host_to_daemon.ends_with("a.sock"));
//! ```

use crate::endpoints::ChannelEndpoints;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Endpoints inside a fresh temporary directory
///
/// Keep the returned `TempDir` alive for as long as the endpoints are used.
pub fn temp_endpoints() -> (TempDir, ChannelEndpoints) {
    let dir = tempfile::Builder::new()
        .prefix("usb-serial-test")
        .tempdir()
        .expect("Failed to create temp dir");
    let endpoints = ChannelEndpoints::in_dir(dir.path());
    (dir, endpoints)
}

/// Poll `condition` until it holds or `timeout` elapses
///
/// Returns whether the condition held.
pub fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_until_immediate() {
        assert!(wait_until(Duration::from_millis(10), || true));
    }

    #[test]
    fn test_wait_until_times_out() {
        let start = Instant::now();
        assert!(!wait_until(Duration::from_millis(30), || false));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
