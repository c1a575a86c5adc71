//! Helper subcommands started by the router.
//!
//! Each returns the process exit code: 0 clean, 1 failure, 2 port not found.

use midicable_core::engine::CLIENT_NAME;
use midicable_core::worker::{self, WorkerExit};
use midicable_core::MidiDriver;
use tracing::error;

fn driver(role: &str) -> Option<MidiDriver> {
    match MidiDriver::new(format!("{}-{}", CLIENT_NAME, role)) {
        Ok(driver) => Some(driver),
        Err(e) => {
            error!("{}", e);
            None
        }
    }
}

pub fn pipe(destination: &str) -> i32 {
    match driver("pipe") {
        Some(driver) => worker::pipe::run(&driver, destination).code(),
        None => WorkerExit::Failure.code(),
    }
}

pub fn relay(source: &str, destination: &str) -> i32 {
    match driver("relay") {
        Some(driver) => worker::relay::run(&driver, source, destination).code(),
        None => WorkerExit::Failure.code(),
    }
}
