//! Pipe worker: framed messages on stdin, one MIDI output.

use std::io::{self, BufReader};

use tracing::{debug, error, info};

use super::{announce_ready, forward_frames, WorkerExit};
use crate::adapters::MidiDriver;

/// Run a pipe worker bound to `destination` until stdin closes.
pub fn run(driver: &MidiDriver, destination: &str) -> WorkerExit {
    let mut output = match driver.connect_output(destination) {
        Ok(output) => output,
        Err(e) => {
            error!("{}", e);
            return WorkerExit::from_startup_error(&e);
        }
    };
    if let Err(e) = announce_ready() {
        error!("Failed to announce readiness: {}", e);
        return WorkerExit::Failure;
    }
    info!("Pipe worker forwarding to '{}'", destination);

    let stdin = io::stdin().lock();
    match forward_frames(BufReader::new(stdin), &mut output) {
        Ok(stats) => {
            debug!(
                "Pipe closed: {} forwarded, {} rejected, {} failed",
                stats.forwarded, stats.rejected, stats.failed
            );
            WorkerExit::Clean
        }
        Err(e) => {
            error!("Pipe worker stopped: {}", e);
            WorkerExit::Failure
        }
    }
}
