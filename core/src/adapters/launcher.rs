//! Subprocess-backed worker launcher.

use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::ports::WorkerLauncher;
use crate::worker::{WorkerHandle, WorkerKind, READY_LINE};

/// How long to wait for the exit code of a worker that closed stdout early.
const EXIT_CODE_WAIT: Duration = Duration::from_millis(500);

/// Starts workers as `<program> [prefix args] pipe-worker|relay-worker ...`
/// and waits for each to print `READY`.
pub struct SubprocessLauncher {
    program: PathBuf,
    prefix_args: Vec<String>,
    startup_timeout: Duration,
}

impl SubprocessLauncher {
    /// Launch workers from the current executable.
    pub fn new(startup_timeout: Duration) -> Result<Self> {
        let program = std::env::current_exe()
            .map_err(|e| Error::Config(format!("Could not locate own executable: {}", e)))?;
        Ok(Self::with_program(program, Vec::new(), startup_timeout))
    }

    pub fn with_program(
        program: impl Into<PathBuf>,
        prefix_args: Vec<String>,
        startup_timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            prefix_args,
            startup_timeout,
        }
    }

    fn launch(&self, kind: WorkerKind, args: &[&str]) -> Result<WorkerHandle> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.prefix_args)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        match kind {
            WorkerKind::Pipe => command.stdin(Stdio::piped()),
            WorkerKind::Relay => command.stdin(Stdio::null()),
        };

        let mut child = command
            .spawn()
            .map_err(|e| Error::SpawnFailure(format!("Failed to start {}: {}", kind, e)))?;
        let stdout = child.stdout.take();
        let mut handle = WorkerHandle::new(kind, child);
        let stdout =
            stdout.ok_or_else(|| Error::SpawnFailure(format!("{} has no stdout", kind)))?;

        let (tx, rx) = bounded(1);
        thread::Builder::new()
            .name(format!("midicable-ready-{}", handle.pid()))
            .spawn(move || {
                let mut line = String::new();
                let read = BufReader::new(stdout).read_line(&mut line).map(|_| line);
                let _ = tx.send(read);
            })
            .map_err(|e| Error::SpawnFailure(format!("Failed to watch {}: {}", kind, e)))?;

        match rx.recv_timeout(self.startup_timeout) {
            Ok(Ok(line)) if line.trim() == READY_LINE => {
                info!("Started {} {} ({})", kind, handle.pid(), args.join(" "));
                Ok(handle)
            }
            Ok(_) | Err(RecvTimeoutError::Disconnected) => {
                let code = match handle.wait_exit(EXIT_CODE_WAIT) {
                    Ok(status) => status.and_then(|status| status.code()),
                    Err(e) => {
                        warn!("Failed to read exit status of {} {}: {}", kind, handle.pid(), e);
                        None
                    }
                };
                debug!("{} {} exited before ready", kind, handle.pid());
                Err(Error::SpawnFailure(match code {
                    Some(code) => format!("{} exited with code {}", kind, code),
                    None => format!("{} exited before becoming ready", kind),
                }))
            }
            Err(RecvTimeoutError::Timeout) => {
                // The handle reaps it on drop if the signal did not land.
                if let Err(e) = handle.kill() {
                    warn!("Failed to stop {} {}: {}", kind, handle.pid(), e);
                }
                Err(Error::SpawnFailure(format!(
                    "{} not ready within {:?}",
                    kind, self.startup_timeout
                )))
            }
        }
    }
}

impl WorkerLauncher for SubprocessLauncher {
    fn spawn_pipe(&self, destination: &str) -> Result<WorkerHandle> {
        self.launch(WorkerKind::Pipe, &["pipe-worker", destination])
    }

    fn spawn_relay(&self, source: &str, destination: &str) -> Result<WorkerHandle> {
        self.launch(WorkerKind::Relay, &["relay-worker", source, destination])
    }
}
