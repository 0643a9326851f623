//! usb-serial-host
//!
//! Opens a bridge to a USB serial device through `usb-serial-daemon` and
//! connects it to stdin/stdout: each stdin line goes to the device, each
//! device line is printed.

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use common::setup_logging;
use host::{HostConfig, HostProxy, PortRegistry};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// readline bound while stdin is still open
const INTERACTIVE_POLL: Duration = Duration::from_millis(20);

#[derive(Parser, Debug)]
#[command(name = "usb-serial-host")]
#[command(author, version, about = "Talk to a USB serial device through usb-serial-daemon")]
#[command(long_about = "
Spawns usb-serial-daemon for PORT, completes the channel handshake and relays
stdin lines to the device and device lines to stdout until stdin closes.

EXAMPLES:
    # List ports reported by the configured listing command
    usb-serial-host --list

    # Talk to a printer at 250000 baud
    usb-serial-host --baud 250000 /dev/bus/usb/001/004

    # Send a file and wait up to 5 seconds for trailing output
    usb-serial-host --timeout 5 1a86:7523 < job.gcode

CONFIGURATION:
    ~/.config/usb-serial-bridge/host.toml (or --config PATH). Use
    daemon.launcher = [\"termux-usb\", \"-r\", \"-e\"] on Android.
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Print recognized ports and exit
    #[arg(long)]
    list: bool,

    /// Baud rate
    #[arg(short, long, default_value_t = 115200)]
    baud: u32,

    /// Seconds to wait for device output once stdin has closed
    #[arg(short, long, value_name = "SECS")]
    timeout: Option<f64>,

    /// Port to open
    #[arg(value_name = "PORT")]
    port: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = HostConfig::default();
        let path = HostConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        HostConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        HostConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.host.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usb-serial-bridge host v{}", env!("CARGO_PKG_VERSION"));

    let registry = PortRegistry::new();
    if let Some(command) = &config.host.list_command {
        registry
            .refresh_from_command(command)
            .context("Failed to list ports")?;
    }

    if args.list {
        if config.host.list_command.is_none() {
            bail!("No host.list_command configured");
        }
        for port in registry.ports() {
            println!("{}", port);
        }
        return Ok(());
    }

    let port = args
        .port
        .ok_or_else(|| anyhow!("No port given (see --list)"))?;

    let drain_timeout = match args.timeout {
        Some(secs) if secs.is_finite() && secs > 0.0 => Duration::from_secs_f64(secs),
        Some(secs) => bail!("Invalid timeout: {}", secs),
        None => config.read_timeout(),
    };

    let opened = if config.host.list_command.is_some() {
        registry
            .open(&port, args.baud, &config)
            .ok_or_else(|| anyhow!("Port {} was not reported by the listing command", port))?
    } else {
        HostProxy::open(&config, &port, args.baud)
    };
    let proxy = opened.with_context(|| format!("Failed to open {}", port))?;

    relay(proxy, spawn_stdin_reader(), drain_timeout)
}

/// Forward stdin lines on a background thread
fn spawn_stdin_reader() -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut stdin = io::stdin().lock();
        loop {
            let mut line = Vec::new();
            match stdin.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("stdin: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

fn relay(mut proxy: HostProxy, input: Receiver<Vec<u8>>, drain_timeout: Duration) -> Result<()> {
    let mut stdout = io::stdout().lock();
    proxy.set_timeout(INTERACTIVE_POLL);

    let mut stdin_open = true;
    while proxy.is_open() {
        while stdin_open {
            match input.try_recv() {
                Ok(line) => {
                    if proxy.write(&line) == 0 {
                        break;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    info!("stdin closed, waiting {:?} for device output", drain_timeout);
                    stdin_open = false;
                    proxy.set_timeout(drain_timeout);
                }
            }
        }

        let line = proxy.readline();
        if line.is_empty() {
            if !stdin_open {
                break;
            }
            continue;
        }
        stdout.write_all(&line)?;
        stdout.flush()?;
    }

    // Closed underneath us while stdin still had input to send
    let lost = stdin_open && !proxy.is_open();
    proxy.close();
    if lost {
        bail!("Bridge to {} closed by the daemon", proxy.port());
    }
    Ok(())
}
