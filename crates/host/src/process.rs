//! Daemon process supervision
//!
//! The daemon runs in its own process group so that a launcher shell and
//! everything it starts can be signalled together.

use crate::error::{ProxyError, Result};
use common::{ChannelEndpoints, ENV_BAUDRATE, ENV_HANDSHAKE_TIMEOUT_MS};
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Everything needed to start one daemon
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Launcher prefix and daemon program
    pub command: Vec<String>,
    /// Device reference, appended as the final argument
    pub port: String,
    pub baud: u32,
    pub endpoints: ChannelEndpoints,
    pub handshake_timeout: Duration,
}

impl LaunchRequest {
    /// Build the command line and environment
    pub fn to_command(&self) -> Result<Command> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| ProxyError::Config("Empty daemon command".to_string()))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .arg(&self.port)
            .envs(self.endpoints.env_vars())
            .env(ENV_BAUDRATE, self.baud.to_string())
            .env(
                ENV_HANDSHAKE_TIMEOUT_MS,
                self.handshake_timeout.as_millis().to_string(),
            )
            // Device output only travels over channel B
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .process_group(0);
        Ok(command)
    }
}

/// A spawned daemon and its process group
#[derive(Debug)]
pub struct DaemonProcess {
    child: Child,
    status: Option<ExitStatus>,
    terminated: bool,
}

impl DaemonProcess {
    pub fn spawn(request: &LaunchRequest) -> Result<Self> {
        let mut command = request.to_command()?;
        let child = command.spawn().map_err(|source| ProxyError::Spawn {
            program: request.command.join(" "),
            source,
        })?;

        info!(
            "Spawned daemon pid {} for {} at {} baud",
            child.id(),
            request.port,
            request.baud
        );
        Ok(Self::from_child(child))
    }

    /// Supervise an already-spawned child
    ///
    /// The child must lead its own process group.
    pub fn from_child(child: Child) -> Self {
        Self {
            child,
            status: None,
            terminated: false,
        }
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    fn group(&self) -> Pid {
        Pid::from_raw(self.child.id() as i32)
    }

    /// Exit status if the daemon has exited; reaps it
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        if self.status.is_none() {
            self.status = self.child.try_wait()?;
        }
        Ok(self.status)
    }

    fn signal_group(&self, signal: Signal) {
        match killpg(self.group(), signal) {
            Ok(()) => debug!("Sent {} to process group {}", signal, self.group()),
            // Group already empty
            Err(Errno::ESRCH) => {}
            Err(e) => warn!(
                "Failed to send {} to process group {}: {}",
                signal,
                self.group(),
                e
            ),
        }
    }

    /// Stop the whole process group and reap the daemon
    ///
    /// Sends SIGTERM, waits up to `grace` for the daemon to exit, then sends
    /// SIGKILL. Once the daemon has been reaped its pid and group id may be
    /// reused, so a daemon already reaped is never signalled: repeated calls,
    /// or calls after [`try_wait`](Self::try_wait) saw it exit, return the
    /// recorded status.
    pub fn terminate(&mut self, grace: Duration) -> Result<ExitStatus> {
        self.terminated = true;
        if let Some(status) = self.status {
            debug!("Daemon pid {} already reaped: {}", self.id(), status);
            return Ok(status);
        }

        self.signal_group(Signal::SIGTERM);

        let deadline = Instant::now() + grace;
        let status = loop {
            if let Some(status) = self.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                warn!(
                    "Daemon pid {} ignored SIGTERM for {:?}, killing",
                    self.id(),
                    grace
                );
                self.signal_group(Signal::SIGKILL);
                let status = self.child.wait()?;
                self.status = Some(status);
                break status;
            }
            std::thread::sleep(EXIT_POLL_INTERVAL);
        };

        // Anything the daemon left behind in its group. The leader was alive
        // when SIGTERM went out, so the group is still the daemon's.
        self.signal_group(Signal::SIGKILL);

        info!("Daemon pid {} stopped: {}", self.id(), status);
        Ok(status)
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        if !self.terminated
            && let Err(e) = self.terminate(Duration::ZERO)
        {
            warn!("Failed to stop daemon pid {}: {}", self.id(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    fn request(command: &[&str], port: &str) -> LaunchRequest {
        LaunchRequest {
            command: command.iter().map(|s| s.to_string()).collect(),
            port: port.to_string(),
            baud: 115200,
            endpoints: ChannelEndpoints::new("/tmp/x/a.sock", "/tmp/x/b.sock"),
            handshake_timeout: Duration::from_millis(2500),
        }
    }

    fn env_of<'a>(command: &'a Command, key: &str) -> Option<&'a OsStr> {
        command
            .get_envs()
            .find(|(k, _)| *k == OsStr::new(key))
            .and_then(|(_, v)| v)
    }

    #[test]
    fn test_command_line_and_environment() {
        let command = request(&["termux-usb", "-r", "-e", "usb-serial-daemon"], "/dev/bus/usb/001/004")
            .to_command()
            .unwrap();

        assert_eq!(command.get_program(), "termux-usb");
        let args: Vec<_> = command.get_args().collect();
        assert_eq!(args, ["-r", "-e", "usb-serial-daemon", "/dev/bus/usb/001/004"]);

        assert_eq!(env_of(&command, "USB_SERIAL_BAUDRATE"), Some(OsStr::new("115200")));
        assert_eq!(
            env_of(&command, "USB_SERIAL_CHANNEL_A"),
            Some(OsStr::new("/tmp/x/a.sock"))
        );
        assert_eq!(
            env_of(&command, "USB_SERIAL_CHANNEL_B"),
            Some(OsStr::new("/tmp/x/b.sock"))
        );
        assert_eq!(
            env_of(&command, "USB_SERIAL_HANDSHAKE_TIMEOUT_MS"),
            Some(OsStr::new("2500"))
        );
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(matches!(
            request(&[], "1").to_command(),
            Err(ProxyError::Config(_))
        ));
    }

    #[test]
    fn test_spawn_missing_program() {
        let result = DaemonProcess::spawn(&request(&["/nonexistent/usb-serial-daemon"], "1"));
        assert!(matches!(result, Err(ProxyError::Spawn { .. })));
    }

    #[test]
    fn test_terminate_sleeping_daemon() {
        let mut daemon = DaemonProcess::spawn(&request(&["sleep"], "30")).unwrap();
        assert_eq!(daemon.try_wait().unwrap(), None);

        let status = daemon.terminate(Duration::from_millis(500)).unwrap();
        assert!(!status.success());

        // Idempotent
        assert_eq!(daemon.terminate(Duration::from_millis(500)).unwrap(), status);
    }

    #[test]
    fn test_terminate_escalates_to_sigkill() {
        use std::os::unix::process::ExitStatusExt;

        // The shell ignores SIGTERM, so only SIGKILL stops it
        let mut daemon = DaemonProcess::spawn(&request(
            &["sh", "-c", "trap '' TERM; while :; do sleep 0.05; done"],
            "1",
        ))
        .unwrap();
        std::thread::sleep(Duration::from_millis(100));

        let status = daemon.terminate(Duration::from_millis(100)).unwrap();
        assert_eq!(status.signal(), Some(9));
    }

    #[test]
    fn test_exited_daemon_status_recorded() {
        let mut daemon = DaemonProcess::spawn(&request(&["sh", "-c", "exit 4"], "1")).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let status = loop {
            if let Some(status) = daemon.try_wait().unwrap() {
                break status;
            }
            assert!(Instant::now() < deadline, "daemon never exited");
            std::thread::sleep(Duration::from_millis(5));
        };
        assert_eq!(status.code(), Some(4));
        assert_eq!(daemon.terminate(Duration::ZERO).unwrap().code(), Some(4));
    }

    #[test]
    fn test_reaped_daemon_group_not_signalled() {
        use nix::sys::signal::kill;
        use std::io::{BufRead, BufReader};

        // The leader exits at once and leaves a member behind in its group
        let mut child = Command::new("sh")
            .args(["-c", "sleep 30 & echo $!; exit 0"])
            .stdout(Stdio::piped())
            .process_group(0)
            .spawn()
            .unwrap();
        let mut line = String::new();
        BufReader::new(child.stdout.take().unwrap())
            .read_line(&mut line)
            .unwrap();
        let member = Pid::from_raw(line.trim().parse().unwrap());

        let mut daemon = DaemonProcess::from_child(child);
        let deadline = Instant::now() + Duration::from_secs(5);
        while daemon.try_wait().unwrap().is_none() {
            assert!(Instant::now() < deadline, "daemon never exited");
            std::thread::sleep(Duration::from_millis(5));
        }

        assert!(daemon.terminate(Duration::from_millis(100)).unwrap().success());
        assert!(kill(member, None).is_ok());

        kill(member, Signal::SIGKILL).unwrap();
    }
}
