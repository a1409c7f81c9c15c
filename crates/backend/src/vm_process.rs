//! VM process lifecycle.
//!
//! The emulated machine writes its PID to a marker file. Only one VM may own
//! that marker; a marker left behind by a previous run must be cleared before
//! a new VM starts.
//!
//! Clearing proceeds in stages:
//! 1. run the stop tool (`cros_stop_vm --kvm_pid=<marker>`)
//! 2. if the marker survives, signal the PID it names (SIGTERM, then SIGKILL)
//!    and remove the marker
//! 3. confirm the marker is gone

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::BackendError;
use crate::exec::{CommandRunner, CommandSpec};

const STOP_TOOL: &str = "cros_stop_vm";
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Owns the VM PID marker.
#[derive(Debug, Clone)]
pub struct VmProcessGuard {
    pid_file: PathBuf,
    stop_tool: PathBuf,
    kill_grace: Duration,
}

impl VmProcessGuard {
    /// Creates a guard for `pid_file`, using the stop tool found in `bin_dir`.
    pub fn new(pid_file: impl Into<PathBuf>, bin_dir: impl AsRef<Path>) -> Self {
        Self {
            pid_file: pid_file.into(),
            stop_tool: bin_dir.as_ref().join(STOP_TOOL),
            kill_grace: Duration::from_secs(5),
        }
    }

    /// Sets how long to wait after SIGTERM before sending SIGKILL.
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    /// Whether a marker currently exists.
    pub fn marker_exists(&self) -> bool {
        self.pid_file.exists()
    }

    /// Clears any stale VM before a new one starts.
    ///
    /// # Errors
    ///
    /// `BackendError::StaleMarker` if the marker still exists afterwards.
    pub async fn acquire<R: CommandRunner>(&self, runner: &R) -> Result<(), BackendError> {
        if self.marker_exists() {
            warn!(
                pid_file = %self.pid_file.display(),
                "existing vm pid marker found, stopping vm"
            );
            self.stop(runner).await;
        }
        self.ensure_cleared()
    }

    /// Stops the VM owned by this guard, if any.
    ///
    /// # Errors
    ///
    /// `BackendError::StaleMarker` if the marker could not be cleared.
    pub async fn release<R: CommandRunner>(&self, runner: &R) -> Result<(), BackendError> {
        if self.marker_exists() {
            info!(pid_file = %self.pid_file.display(), "stopping vm");
            self.stop(runner).await;
        }
        self.ensure_cleared()
    }

    async fn stop<R: CommandRunner>(&self, runner: &R) {
        let cmd = CommandSpec::new(&self.stop_tool)
            .arg(format!("--kvm_pid={}", self.pid_file.display()));
        match runner.run_captured(&cmd).await {
            Ok(out) if !out.success() => {
                warn!(exit_code = out.code, stderr = %out.stderr.trim(), "stop tool failed");
            }
            Ok(_) => debug!("stop tool finished"),
            Err(e) => warn!(error = %e, "stop tool could not be run"),
        }

        if self.marker_exists() {
            warn!(
                pid_file = %self.pid_file.display(),
                "marker survived stop tool, killing process directly"
            );
            self.kill_from_marker().await;
        }
    }

    async fn kill_from_marker(&self) {
        match tokio::fs::read_to_string(&self.pid_file).await {
            Ok(content) => match content.trim().parse::<i32>() {
                Ok(pid) if pid > 0 => terminate(pid, self.kill_grace).await,
                _ => warn!(content = %content.trim(), "pid marker does not hold a valid pid"),
            },
            Err(e) => warn!(error = %e, "failed to read pid marker"),
        }

        match tokio::fs::remove_file(&self.pid_file).await {
            Ok(()) => info!(pid_file = %self.pid_file.display(), "pid marker removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, "failed to remove pid marker"),
        }
    }

    fn ensure_cleared(&self) -> Result<(), BackendError> {
        if self.marker_exists() {
            return Err(BackendError::StaleMarker {
                path: self.pid_file.display().to_string(),
            });
        }
        Ok(())
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL if still alive.
async fn terminate(pid: i32, grace: Duration) {
    if !is_alive(pid) {
        debug!(pid, "process already gone");
        return;
    }

    info!(pid, "sending SIGTERM to vm process");
    send_signal(pid, Signal::Term);

    let deadline = tokio::time::Instant::now() + grace;
    while tokio::time::Instant::now() < deadline {
        if !is_alive(pid) {
            return;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    if is_alive(pid) {
        warn!(pid, "vm process ignored SIGTERM, sending SIGKILL");
        send_signal(pid, Signal::Kill);
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn is_alive(pid: i32) -> bool {
    // SAFETY: kill(2) with signal 0 only checks for existence and permissions
    let result = unsafe { libc::kill(pid as libc::pid_t, 0) };
    result == 0 || std::io::Error::last_os_error().kind() == std::io::ErrorKind::PermissionDenied
}

#[cfg(unix)]
fn send_signal(pid: i32, signal: Signal) {
    let signo = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // SAFETY: kill(2) has no memory-safety preconditions; failures are reported via errno
    let result = unsafe { libc::kill(pid as libc::pid_t, signo) };
    if result != 0 {
        let err = std::io::Error::last_os_error();
        warn!(pid, ?signal, error = %err, "failed to signal vm process");
    }
}

#[cfg(not(unix))]
fn is_alive(_pid: i32) -> bool {
    false
}

#[cfg(not(unix))]
fn send_signal(pid: i32, signal: Signal) {
    warn!(pid, ?signal, "process signals are not supported on this platform");
}
