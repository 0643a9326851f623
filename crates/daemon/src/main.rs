//! usb-serial-daemon
//!
//! Bridges one USB serial device to a host process. Normally started by
//! `usb-serial-host`, which passes the channel endpoints and the baud rate
//! through the environment.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::{
    ChannelEndpoints, ENV_BAUDRATE, ENV_CHANNEL_A, ENV_CHANNEL_B, ENV_HANDSHAKE_TIMEOUT_MS,
    setup_logging,
};
use daemon::usb::{Classifier, DeviceRef, open_device};
use daemon::{DaemonConfig, DaemonError, run_daemon};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "usb-serial-daemon")]
#[command(author, version, about = "Bridge one USB serial device to a host process")]
#[command(long_about = "
Claims a USB serial device (CDC-ACM or CH340), configures its baud rate and
relays bytes between the device and a host process over two local channels.
Device output is forwarded one line at a time.

The host normally starts this program and sets USB_SERIAL_CHANNEL_A,
USB_SERIAL_CHANNEL_B and USB_SERIAL_BAUDRATE.

DEVICE:
    fd:<n> or <n>       already-opened usbfs file descriptor (termux-usb)
    <bus>-<address>     decimal bus number and device address
    <vid>:<pid>         hexadecimal vendor and product id

EXIT STATUS:
    0 orderly shutdown, 2 unsupported device, 3 endpoint not found,
    4 unsupported baud rate, 5 handshake failure, 6 device open failure,
    1 anything else
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Baud rate
    #[arg(short, long, env = ENV_BAUDRATE)]
    baud: Option<u32>,

    /// Listener path of channel A (host to daemon)
    #[arg(long, value_name = "PATH", env = ENV_CHANNEL_A)]
    channel_a: Option<PathBuf>,

    /// Listener path of channel B (daemon to host)
    #[arg(long, value_name = "PATH", env = ENV_CHANNEL_B)]
    channel_b: Option<PathBuf>,

    /// Bound on each handshake step in milliseconds
    #[arg(long, value_name = "MS", env = ENV_HANDSHAKE_TIMEOUT_MS)]
    handshake_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Print the device's descriptors and classification, then exit
    #[arg(long)]
    describe: bool,

    /// Device reference
    #[arg(value_name = "DEVICE")]
    device: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e.downcast_ref::<DaemonError>().map_or(1, DaemonError::exit_code);
            // Logging may not be set up yet when configuration fails
            eprintln!("usb-serial-daemon: {:#}", e);
            ExitCode::from(code)
        }
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = if let Some(ref path) = args.config {
        DaemonConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        DaemonConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.daemon.log_level.clone());
    setup_logging(&log_level).context("Failed to setup logging")?;

    info!("usb-serial-bridge daemon v{}", env!("CARGO_PKG_VERSION"));

    let device: DeviceRef = args.device.parse()?;

    if args.describe {
        return describe(&device);
    }

    if let Some(ms) = args.handshake_timeout_ms {
        // The file setting is in whole seconds; round the environment value up
        config.daemon.handshake_timeout_secs = ms.div_ceil(1000).max(1);
    }

    let baud = args
        .baud
        .ok_or_else(|| DaemonError::Config(format!("No baud rate given (--baud or {})", ENV_BAUDRATE)))?;

    let endpoints = match (args.channel_a, args.channel_b) {
        (Some(a), Some(b)) => ChannelEndpoints::new(a, b),
        _ => {
            return Err(anyhow!(DaemonError::Config(format!(
                "Channel endpoints not given (--channel-a/--channel-b or {}/{})",
                ENV_CHANNEL_A, ENV_CHANNEL_B
            ))));
        }
    };

    info!("Bridging {} at {} baud", device, baud);
    let stats = run_daemon(&device, baud, &endpoints, &config)?;
    info!(
        "Orderly shutdown ({} frames forwarded to host)",
        stats.frames_to_host
    );
    Ok(())
}

/// Print descriptors and the classification result
fn describe(device: &DeviceRef) -> Result<()> {
    let opened = open_device(device)?;
    print!("{}", opened.summary);

    match Classifier::new().classify(&opened.summary) {
        Ok(kind) => println!("Driver: {} ({:?})", kind.name(), kind),
        Err(e) => println!("Driver: none ({})", e),
    }
    Ok(())
}
