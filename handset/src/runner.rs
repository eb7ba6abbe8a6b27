//! Companion process management: launch or attach, and release.
//!
//! A [`CompanionRunner`] hands out ready-to-use [`Channel`]s. The driver's
//! session asks for a new one whenever the previous channel fails.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use handset_proto::{Request, Response};

use crate::channel::{Channel, Endpoint};
use crate::error::{Error, Result};

/// Interval between readiness probes.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Grace period between a protocol shutdown and a kill.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Starts and stops channels to a companion process.
pub trait CompanionRunner: Send + Sync {
    /// Launches or attaches to the companion and returns a ready channel.
    fn start(&self) -> Result<Channel>;

    /// Releases `channel`. Safe to call on an already-stopped channel.
    fn stop(&self, channel: &Channel);
}

/// Sends a ping and waits for a pong.
pub fn ping(channel: &Channel) -> Result<String> {
    match channel.unary(Request::Ping)? {
        Response::Pong { version } => Ok(version),
        other => Err(Error::Protocol(format!("expected Pong, got {other:?}"))),
    }
}

/// Polls `channel` with pings until it answers or `timeout` elapses.
fn wait_ready(channel: &Channel, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        match ping(channel) {
            Ok(version) => {
                tracing::info!(endpoint = %channel.endpoint(), %version, "companion ready");
                return Ok(());
            }
            Err(e) if e.is_transport() && Instant::now() < deadline => {
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) if e.is_transport() => {
                return Err(Error::transport(format!(
                    "companion at {} did not become ready: {e}",
                    channel.endpoint()
                )));
            }
            Err(e) => return Err(e),
        }
    }
}

/// Attaches to a companion that someone else keeps running.
#[derive(Debug, Clone)]
pub struct RemoteCompanion {
    /// Where the companion listens.
    endpoint: Endpoint,
    /// Readiness timeout on start.
    ready_timeout: Duration,
}

impl RemoteCompanion {
    /// Attaches to `endpoint`, waiting up to 10 s for it on each start.
    pub const fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            ready_timeout: Duration::from_secs(10),
        }
    }

    /// Overrides the readiness timeout.
    #[must_use]
    pub const fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }
}

impl CompanionRunner for RemoteCompanion {
    fn start(&self) -> Result<Channel> {
        let channel = Channel::new(self.endpoint.clone());
        wait_ready(&channel, self.ready_timeout)?;
        tracing::info!(channel = channel.id(), endpoint = %self.endpoint, "attached to companion");
        Ok(channel)
    }

    fn stop(&self, channel: &Channel) {
        if channel.shutdown() {
            tracing::info!(channel = channel.id(), "detached from companion");
        }
    }
}

/// Builder for [`LocalCompanion`].
///
/// # Example
///
/// ```no_run
/// use handset::LocalCompanion;
///
/// let runner = LocalCompanion::builder("/usr/local/bin/idb_companion")
///     .device_id("00008030-001A")
///     .endpoint("127.0.0.1:10882".parse().expect("valid endpoint"))
///     .build();
/// ```
#[derive(Debug)]
#[must_use = "a LocalCompanionBuilder does nothing until .build() is called"]
pub struct LocalCompanionBuilder {
    /// Companion executable.
    program: PathBuf,
    /// Target device.
    device_id: Option<String>,
    /// Listen endpoint passed to the companion.
    endpoint: Option<Endpoint>,
    /// Extra arguments.
    args: Vec<String>,
    /// Readiness timeout.
    ready_timeout: Duration,
}

impl LocalCompanionBuilder {
    /// Sets the target device identifier (passed as `--udid`).
    pub fn device_id(mut self, id: impl Into<String>) -> Self {
        self.device_id = Some(id.into());
        self
    }

    /// Sets the listen endpoint (default: `127.0.0.1:10882`).
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Appends an extra command-line argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Sets how long `start` waits for the companion to answer (default 10 s).
    pub const fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Finishes the builder.
    pub fn build(self) -> LocalCompanion {
        let endpoint = self.endpoint.unwrap_or_else(|| {
            Endpoint::Tcp(([127, 0, 0, 1], handset_proto::DEFAULT_PORT).into())
        });
        LocalCompanion {
            program: self.program,
            device_id: self.device_id,
            endpoint,
            args: self.args,
            ready_timeout: self.ready_timeout,
            child: Mutex::new(None),
        }
    }
}

/// Spawns the companion as a child process and owns its lifetime.
#[derive(Debug)]
pub struct LocalCompanion {
    /// Companion executable.
    program: PathBuf,
    /// Target device.
    device_id: Option<String>,
    /// Listen endpoint.
    endpoint: Endpoint,
    /// Extra arguments.
    args: Vec<String>,
    /// Readiness timeout.
    ready_timeout: Duration,
    /// Running child, if any.
    child: Mutex<Option<Child>>,
}

impl LocalCompanion {
    /// Starts building a runner for the companion executable at `program`.
    pub fn builder(program: impl Into<PathBuf>) -> LocalCompanionBuilder {
        LocalCompanionBuilder {
            program: program.into(),
            device_id: None,
            endpoint: None,
            args: Vec::new(),
            ready_timeout: Duration::from_secs(10),
        }
    }

    /// Command line for the companion.
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        if let Some(id) = &self.device_id {
            cmd.arg("--udid").arg(id);
        }
        match &self.endpoint {
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                cmd.arg("--grpc-domain-sock").arg(path);
            }
            Endpoint::Tcp(addr) => {
                cmd.arg("--grpc-port").arg(addr.port().to_string());
            }
        }
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());
        cmd
    }

    /// Kills and reaps the child, if any.
    fn reap(&self) {
        let child = self.child.lock().map_or(None, |mut g| g.take());
        let Some(mut child) = child else {
            return;
        };
        let deadline = Instant::now() + STOP_GRACE;
        while Instant::now() < deadline {
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::info!(pid = child.id(), %status, "companion exited");
                    return;
                }
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(_) => break,
            }
        }
        tracing::warn!(pid = child.id(), "companion did not exit, killing");
        let _ = child.kill();
        let _ = child.wait();
    }
}

impl CompanionRunner for LocalCompanion {
    fn start(&self) -> Result<Channel> {
        self.reap();

        let child = self.command().spawn()?;
        tracing::info!(pid = child.id(), program = %self.program.display(), "spawned companion");
        if let Ok(mut guard) = self.child.lock() {
            *guard = Some(child);
        }

        let channel = Channel::new(self.endpoint.clone());
        if let Err(e) = wait_ready(&channel, self.ready_timeout) {
            channel.shutdown();
            self.reap();
            return Err(e);
        }
        Ok(channel)
    }

    fn stop(&self, channel: &Channel) {
        if !channel.shutdown() {
            return;
        }
        // Try protocol-level shutdown first.
        let probe = Channel::new(channel.endpoint().clone());
        let _ = probe.unary(Request::Shutdown);
        probe.shutdown();
        self.reap();
    }
}

impl Drop for LocalCompanion {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.child.lock()
            && let Some(mut child) = guard.take()
        {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_executable_is_local_error() {
        let runner = LocalCompanion::builder("/nonexistent/companion")
            .ready_timeout(Duration::from_millis(50))
            .build();
        let err = runner.start().unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[cfg(unix)]
    #[test]
    fn unreachable_companion_times_out_as_transport_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RemoteCompanion::new(Endpoint::Unix(dir.path().join("absent.sock")))
            .ready_timeout(Duration::from_millis(250));
        let started = Instant::now();
        let err = runner.start().unwrap_err();
        assert!(err.is_transport());
        assert!(started.elapsed() >= Duration::from_millis(250));
    }

    #[cfg(unix)]
    #[test]
    fn command_line_names_device_and_socket() {
        let runner = LocalCompanion::builder("idb_companion")
            .device_id("ABC-123")
            .endpoint(Endpoint::Unix("/tmp/companion.sock".into()))
            .arg("--log-level=debug")
            .build();
        let cmd = runner.command();
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            [
                "--udid",
                "ABC-123",
                "--grpc-domain-sock",
                "/tmp/companion.sock",
                "--log-level=debug"
            ]
        );
    }
}
