//! Relay worker: one MIDI input forwarded to one MIDI output.

use std::thread;

use tracing::{error, info};

use super::{announce_ready, forward_one, ForwardStats, WorkerExit};
use crate::adapters::MidiDriver;

/// Run a relay worker from `source` to `destination`.
///
/// Only returns on startup failure; otherwise it forwards until the process
/// is terminated by its owner.
pub fn run(driver: &MidiDriver, source: &str, destination: &str) -> WorkerExit {
    let mut output = match driver.connect_output(destination) {
        Ok(output) => output,
        Err(e) => {
            error!("{}", e);
            return WorkerExit::from_startup_error(&e);
        }
    };

    let mut stats = ForwardStats::default();
    let _input = match driver.connect_input(source, move |msg| {
        forward_one(&mut output, msg, &mut stats);
    }) {
        Ok(connection) => connection,
        Err(e) => {
            error!("{}", e);
            return WorkerExit::from_startup_error(&e);
        }
    };

    if let Err(e) = announce_ready() {
        error!("Failed to announce readiness: {}", e);
        return WorkerExit::Failure;
    }
    info!("Relay worker forwarding '{}' to '{}'", source, destination);

    loop {
        thread::park();
    }
}
