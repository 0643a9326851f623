//! Bridge state machine
//!
//! ```text
//! INITIALIZING --> PURGING --> RUNNING --> SHUTTING_DOWN
//!       |                                      ^
//!       +--------------- (failure) ------------+
//! ```
//!
//! INITIALIZING classifies the device, configures its driver and runs the
//! daemon side of the handshake. PURGING drains whatever the device sent
//! before the host attached. RUNNING polls channel A and the device in one
//! single-threaded loop until the host closes channel A or a fatal error
//! occurs.

use crate::config::DaemonConfig;
use crate::error::{DaemonError, Result};
use crate::usb::{Classifier, DeviceRef, DeviceSummary, SerialDriver, SerialTransport, UsbIo, open_device};
use common::{ChannelEndpoints, ChannelEvent, ChannelReader, ChannelWriter, DaemonChannels, establish_daemon_side};
use protocol::{DEFAULT_MAX_LINE_LENGTH, LineAccumulator};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Initializing,
    Purging,
    Running,
    ShuttingDown,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BridgeState::Initializing => "INITIALIZING",
            BridgeState::Purging => "PURGING",
            BridgeState::Running => "RUNNING",
            BridgeState::ShuttingDown => "SHUTTING_DOWN",
        })
    }
}

/// How long a frame may wait on a host that is not reading channel B
pub const DEFAULT_HOST_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Steady-state loop settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeSettings {
    /// Bulk IN timeout per loop iteration
    pub read_timeout: Duration,
    pub read_chunk_size: usize,
    /// Longest unterminated line kept (0 = unbounded)
    pub max_line_length: usize,
    /// Bound on each frame write to channel B; exceeding it is fatal
    pub host_write_timeout: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(1),
            read_chunk_size: 1024,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            host_write_timeout: DEFAULT_HOST_WRITE_TIMEOUT,
        }
    }
}

/// Counters reported at shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub bytes_purged: usize,
    pub bytes_to_device: usize,
    pub bytes_from_device: usize,
    pub frames_to_host: usize,
    pub lines_dropped: usize,
}

/// Result of one RUNNING iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    /// The host closed its side; shut down cleanly
    HostClosed,
}

pub struct Bridge<T: SerialTransport> {
    state: BridgeState,
    transport: T,
    host_to_daemon: ChannelReader,
    daemon_to_host: ChannelWriter,
    accumulator: LineAccumulator,
    settings: BridgeSettings,
    stats: BridgeStats,
}

impl<T: SerialTransport> Bridge<T> {
    /// Wrap a configured transport and established channels
    pub fn new(transport: T, channels: DaemonChannels, settings: BridgeSettings) -> Result<Self> {
        let mut daemon_to_host = channels.daemon_to_host;
        daemon_to_host.set_write_timeout(settings.host_write_timeout)?;

        Ok(Self {
            state: BridgeState::Initializing,
            transport,
            host_to_daemon: channels.host_to_daemon,
            daemon_to_host,
            accumulator: LineAccumulator::with_max_line_length(settings.max_line_length),
            settings,
            stats: BridgeStats::default(),
        })
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    fn transition(&mut self, next: BridgeState) {
        info!("Bridge state: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Purge, run until the host closes channel A, then shut down
    ///
    /// The transport and both channels are closed whatever the outcome.
    pub fn run(mut self) -> Result<BridgeStats> {
        let result = match self.purge() {
            Ok(()) => self.run_loop(),
            Err(e) => Err(e),
        };

        self.shutdown();
        result.map(|()| self.stats)
    }

    /// Discard bytes the device emitted before the host attached
    pub fn purge(&mut self) -> Result<()> {
        self.transition(BridgeState::Purging);
        let discarded = self.transport.purge()?;
        self.stats.bytes_purged += discarded;
        if discarded > 0 {
            info!("Purged {} stale bytes from device", discarded);
        }
        Ok(())
    }

    fn run_loop(&mut self) -> Result<()> {
        self.transition(BridgeState::Running);
        loop {
            if self.step()? == StepOutcome::HostClosed {
                return Ok(());
            }
        }
    }

    /// One loop iteration: channel A to device, device to accumulator,
    /// complete frames to channel B
    pub fn step(&mut self) -> Result<StepOutcome> {
        match self.host_to_daemon.poll()? {
            ChannelEvent::Message(data) => self.forward_to_device(&data)?,
            ChannelEvent::Idle => {}
            ChannelEvent::Closed => {
                info!("Host closed channel A");
                return Ok(StepOutcome::HostClosed);
            }
        }

        let data = self
            .transport
            .read(self.settings.read_chunk_size, self.settings.read_timeout)?;
        if !data.is_empty() {
            self.stats.bytes_from_device += data.len();
            if let Err(e) = self.accumulator.accumulate(&data) {
                self.stats.lines_dropped += 1;
                warn!("Dropped partial line from device: {}", e);
            }
        }

        for frame in self.accumulator.extract() {
            match self.daemon_to_host.send(&frame) {
                Ok(()) => self.stats.frames_to_host += 1,
                Err(common::Error::ChannelClosed(_)) => {
                    info!("Host closed channel B");
                    return Ok(StepOutcome::HostClosed);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(StepOutcome::Continue)
    }

    fn forward_to_device(&mut self, data: &[u8]) -> Result<()> {
        let mut rest = data;
        while !rest.is_empty() {
            match self.transport.write(rest) {
                Ok(0) | Err(DaemonError::TransferTimeout) => {
                    warn!("Write to device timed out, dropped {} bytes", rest.len());
                    break;
                }
                Ok(n) => {
                    debug!("Wrote {} bytes to device", n);
                    self.stats.bytes_to_device += n;
                    rest = &rest[n.min(rest.len())..];
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.transition(BridgeState::ShuttingDown);
        self.transport.close();
        if let Err(e) = self.daemon_to_host.shutdown() {
            debug!("Channel B shutdown: {}", e);
        }
        if !self.accumulator.is_empty() {
            debug!(
                "Discarding {} unterminated bytes at shutdown",
                self.accumulator.len()
            );
        }
        info!(
            "Bridge stopped: {} bytes to device, {} frames to host, {} bytes purged, {} lines dropped",
            self.stats.bytes_to_device,
            self.stats.frames_to_host,
            self.stats.bytes_purged,
            self.stats.lines_dropped
        );
    }
}

/// INITIALIZING: classify, configure the driver, then handshake
///
/// The driver is configured before the handshake so an unusable device is
/// reported without the host waiting on the channels. On a handshake
/// failure the driver is dropped, which releases its interfaces.
pub fn initialize<U: UsbIo>(
    io: U,
    summary: &DeviceSummary,
    classifier: &Classifier,
    baud: u32,
    endpoints: &ChannelEndpoints,
    config: &DaemonConfig,
) -> Result<Bridge<SerialDriver<U>>> {
    info!("Bridge state: {}", BridgeState::Initializing);

    let result = configure_and_connect(io, summary, classifier, baud, endpoints, config);

    if result.is_err() {
        info!(
            "Bridge state: {} -> {}",
            BridgeState::Initializing,
            BridgeState::ShuttingDown
        );
    }
    result
}

fn configure_and_connect<U: UsbIo>(
    io: U,
    summary: &DeviceSummary,
    classifier: &Classifier,
    baud: u32,
    endpoints: &ChannelEndpoints,
    config: &DaemonConfig,
) -> Result<Bridge<SerialDriver<U>>> {
    let kind = classifier.classify(summary)?;
    info!(
        "Device {:04x}:{:04x} uses the {} driver",
        summary.vendor_id,
        summary.product_id,
        kind.name()
    );

    let driver = SerialDriver::initialize(io, kind, summary, baud, config.transport_settings())?;
    let channels = establish_daemon_side(endpoints, config.handshake_timeout())
        .map_err(DaemonError::Handshake)?;

    Bridge::new(driver, channels, config.bridge_settings())
}

/// Open the device and run the whole bridge lifecycle
pub fn run_daemon(
    device: &DeviceRef,
    baud: u32,
    endpoints: &ChannelEndpoints,
    config: &DaemonConfig,
) -> Result<BridgeStats> {
    let opened = open_device(device)?;
    let classifier = Classifier::new();

    let bridge = initialize(opened.handle, &opened.summary, &classifier, baud, endpoints, config)?;
    bridge.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::classifier::{CH340_PRODUCT_ID, CH340_VENDOR_ID, CLASS_VENDOR_SPECIFIC};
    use crate::usb::descriptor::{EndpointSummary, InterfaceSummary, TransferKind};
    use crate::usb::io::recording::RecordingUsb;
    use bytes::Bytes;
    use common::HostHandshake;
    use common::test_utils::{DEFAULT_TEST_TIMEOUT, temp_endpoints};
    use std::thread;

    fn ch340_summary() -> DeviceSummary {
        DeviceSummary {
            vendor_id: CH340_VENDOR_ID,
            product_id: CH340_PRODUCT_ID,
            bus_number: 1,
            address: 9,
            class_code: 0xFF,
            configuration: 1,
            interfaces: vec![InterfaceSummary {
                number: 0,
                class_code: CLASS_VENDOR_SPECIFIC,
                sub_class_code: 0,
                protocol_code: 0,
                endpoints: vec![
                    EndpointSummary {
                        address: 0x82,
                        transfer_kind: TransferKind::Bulk,
                    },
                    EndpointSummary {
                        address: 0x02,
                        transfer_kind: TransferKind::Bulk,
                    },
                ],
            }],
        }
    }

    fn test_config() -> DaemonConfig {
        let mut config = DaemonConfig::default();
        config.daemon.handshake_timeout_secs = 5;
        config
    }

    #[test]
    fn test_state_display() {
        assert_eq!(BridgeState::Initializing.to_string(), "INITIALIZING");
        assert_eq!(BridgeState::ShuttingDown.to_string(), "SHUTTING_DOWN");
    }

    #[test]
    fn test_full_lifecycle_over_fake_device() {
        let (_dir, endpoints) = temp_endpoints();
        let io = RecordingUsb::new();
        io.queue_inbound(b"boot banner\nstart");
        io.queue_inbound(b""); // ends the purge
        io.queue_inbound(b"ok\n");

        let host = HostHandshake::begin(&endpoints, DEFAULT_TEST_TIMEOUT).unwrap();
        let host_thread = thread::spawn(move || {
            let mut channels = host.complete(|| None).unwrap();
            channels.host_to_daemon.send(b"G28\n").unwrap();
            channels.host_to_daemon.send(b"M105\n").unwrap();

            let first = channels
                .daemon_to_host
                .recv_timeout(DEFAULT_TEST_TIMEOUT)
                .unwrap();
            channels.host_to_daemon.shutdown().unwrap();
            first
        });

        let bridge = initialize(
            io.clone(),
            &ch340_summary(),
            &Classifier::new(),
            115200,
            &endpoints,
            &test_config(),
        )
        .unwrap();
        assert_eq!(bridge.state(), BridgeState::Initializing);

        let stats = bridge.run().unwrap();
        let first = host_thread.join().unwrap();

        assert_eq!(first, ChannelEvent::Message(Bytes::from_static(b"ok\n")));
        assert_eq!(stats.bytes_purged, b"boot banner\nstart".len());
        assert_eq!(stats.frames_to_host, 1);
        assert_eq!(io.written(), b"G28\nM105\n");
    }

    #[test]
    fn test_unsupported_baud_fails_before_handshake() {
        let (_dir, endpoints) = temp_endpoints();
        let io = RecordingUsb::new();

        let result = initialize(
            io.clone(),
            &ch340_summary(),
            &Classifier::new(),
            250000,
            &endpoints,
            &test_config(),
        );

        let Err(err) = result else {
            panic!("Expected failure");
        };
        assert!(matches!(err, DaemonError::UnsupportedBaudRate(250000)));
        assert!(io.calls().is_empty());
        assert!(!endpoints.daemon_to_host.exists());
    }

    #[test]
    fn test_handshake_timeout_releases_interface() {
        let (_dir, endpoints) = temp_endpoints();
        let io = RecordingUsb::new();
        let mut config = test_config();
        config.daemon.handshake_timeout_secs = 1;

        let result = initialize(
            io.clone(),
            &ch340_summary(),
            &Classifier::new(),
            9600,
            &endpoints,
            &config,
        );

        let Err(err) = result else {
            panic!("Expected handshake failure");
        };
        assert_eq!(err.exit_code(), 5);
        assert_eq!(
            io.calls().last(),
            Some(&crate::usb::io::recording::UsbCall::Release(0))
        );
    }
}
