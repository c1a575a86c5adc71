//! Owner-side handle to a helper process.

use std::process::{Child, ChildStdin, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Which helper a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkerKind {
    /// Reads framed messages from stdin; stops on EOF.
    Pipe,
    /// Owns its input and output; stops when killed.
    Relay,
}

impl std::fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerKind::Pipe => write!(f, "pipe worker"),
            WorkerKind::Relay => write!(f, "relay worker"),
        }
    }
}

/// A running helper process.
///
/// A pipe worker is stopped by closing its stdin, a relay worker by a
/// termination signal. Either way [`WorkerHandle::release`] does the right
/// thing, and dropping a handle releases it with no grace period.
pub struct WorkerHandle {
    kind: WorkerKind,
    pid: u32,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl WorkerHandle {
    /// Take ownership of a spawned child.
    pub fn new(kind: WorkerKind, mut child: Child) -> Self {
        let stdin = child.stdin.take();
        Self {
            kind,
            pid: child.id(),
            child: Some(child),
            stdin,
        }
    }

    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Take the write end of the child's stdin.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    /// Exit status if the child has exited, without blocking.
    pub fn try_exit_status(&mut self) -> Result<Option<ExitStatus>> {
        match self.child.as_mut() {
            Some(child) => Ok(child.try_wait()?),
            None => Ok(None),
        }
    }

    /// Poll for exit for at most `timeout`.
    pub fn wait_exit(&mut self, timeout: Duration) -> Result<Option<ExitStatus>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.try_exit_status()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
    }

    /// Ask the child to terminate.
    ///
    /// Returns `Ok(false)` when the child had already exited; that case is
    /// logged and otherwise ignored.
    pub fn kill(&mut self) -> Result<bool> {
        if self.try_exit_status()?.is_some() || self.child.is_none() {
            debug!("{}", Error::TerminationAnomaly { pid: self.pid });
            return Ok(false);
        }
        self.signal_terminate()
    }

    #[cfg(unix)]
    fn signal_terminate(&mut self) -> Result<bool> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        match kill(Pid::from_raw(self.pid as i32), Signal::SIGTERM) {
            Ok(()) => {
                debug!("Sent SIGTERM to {} {}", self.kind, self.pid);
                Ok(true)
            }
            Err(Errno::ESRCH) => {
                debug!("{}", Error::TerminationAnomaly { pid: self.pid });
                Ok(false)
            }
            Err(e) => Err(Error::CommandFailed(format!(
                "Failed to signal process {}: {}",
                self.pid, e
            ))),
        }
    }

    #[cfg(not(unix))]
    fn signal_terminate(&mut self) -> Result<bool> {
        let Some(child) = self.child.as_mut() else {
            return Ok(false);
        };
        match child.kill() {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {
                debug!("{}", Error::TerminationAnomaly { pid: self.pid });
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stop the worker and give up ownership of it.
    ///
    /// Closes stdin (pipe) or signals (relay), then waits up to `grace` for
    /// the exit. A child still running after that is handed to a detached
    /// reaper thread so it never lingers as a zombie.
    pub fn release(mut self, grace: Duration) {
        self.finish(grace);
    }

    fn finish(&mut self, grace: Duration) {
        if self.child.is_none() {
            return;
        }

        drop(self.stdin.take());
        if self.kind == WorkerKind::Relay {
            if let Err(e) = self.kill() {
                warn!("Failed to stop {} {}: {}", self.kind, self.pid, e);
            }
        }

        match self.wait_exit(grace) {
            Ok(Some(status)) => {
                debug!("{} {} exited with {}", self.kind, self.pid, status);
                self.child = None;
            }
            Ok(None) => self.reap_in_background(),
            Err(e) => {
                warn!("Failed to poll {} {}: {}", self.kind, self.pid, e);
                self.reap_in_background();
            }
        }
    }

    fn reap_in_background(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        let pid = self.pid;
        let spawned = thread::Builder::new()
            .name(format!("midicable-reaper-{}", pid))
            .spawn(move || match child.wait() {
                Ok(status) => debug!("Reaped process {} ({})", pid, status),
                Err(e) => warn!("Failed to reap process {}: {}", pid, e),
            });
        if let Err(e) = spawned {
            warn!("Failed to start reaper for process {}: {}", pid, e);
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.finish(Duration::ZERO);
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("kind", &self.kind)
            .field("pid", &self.pid)
            .field("running", &self.child.is_some())
            .finish()
    }
}
