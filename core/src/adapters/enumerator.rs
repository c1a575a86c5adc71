//! Fresh-process port enumeration.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::process::Command;
use tracing::debug;

use crate::domain::RawPorts;
use crate::error::{Error, Result};
use crate::ports::PortEnumerator;

/// Enumerates ports by running `midicable list-ports --json` in a new
/// process, which sees devices attached after this process started.
///
/// Spawns are spaced at least `min_spacing` apart; callers that arrive
/// earlier wait for their slot.
pub struct FreshEnumerator {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    min_spacing: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl FreshEnumerator {
    /// Enumerate through the current executable.
    pub fn new(timeout: Duration, min_spacing: Duration) -> Result<Self> {
        let program = std::env::current_exe()
            .map_err(|e| Error::Config(format!("Could not locate own executable: {}", e)))?;
        Ok(Self::with_command(
            program,
            vec!["list-ports".to_string(), "--json".to_string()],
            timeout,
            min_spacing,
        ))
    }

    /// Enumerate through an arbitrary command printing the JSON port list.
    pub fn with_command(
        program: impl Into<PathBuf>,
        args: Vec<String>,
        timeout: Duration,
        min_spacing: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
            min_spacing,
            next_slot: Mutex::new(None),
        }
    }

    /// Reserve the next spawn slot and return how long to wait for it.
    fn reserve_slot(&self) -> Duration {
        let now = Instant::now();
        let mut next_slot = self.next_slot.lock();
        let start = match *next_slot {
            Some(slot) if slot > now => slot,
            _ => now,
        };
        *next_slot = Some(start + self.min_spacing);
        start - now
    }
}

impl PortEnumerator for FreshEnumerator {
    async fn enumerate(&self) -> Result<RawPorts> {
        let wait = self.reserve_slot();
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| {
                Error::CommandFailed(format!(
                    "Port enumeration did not finish within {:?}",
                    self.timeout
                ))
            })?
            .map_err(|e| Error::CommandFailed(format!("Failed to run port enumeration: {}", e)))?;

        if !output.status.success() {
            return Err(Error::CommandFailed(format!(
                "Port enumeration exited with {}",
                output.status
            )));
        }

        let ports: RawPorts = serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::ParseError(format!("Invalid port list: {}", e)))?;
        debug!(
            "Enumerated {} inputs, {} outputs",
            ports.inputs.len(),
            ports.outputs.len()
        );
        Ok(ports)
    }
}
