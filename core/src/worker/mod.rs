//! Helper processes.
//!
//! Both helpers are the `midicable` binary started with a worker subcommand.
//! A fresh process gets a fresh driver context, so it sees devices attached
//! after the router started. This module has the worker run loops, the pipe
//! framing and the owner-side [`WorkerHandle`].

pub mod framing;
mod handle;
pub mod pipe;
pub mod relay;

use std::io::{self, Read, Write};

use tracing::{debug, warn};

use crate::domain::{validate, Validation};
use crate::error::{Error, Result};
use crate::ports::MessageTarget;

pub use framing::{encode_frame, write_frame, FrameReader, MAX_FRAME_LEN};
pub use handle::{WorkerHandle, WorkerKind};

/// Line a worker prints on stdout once its ports are open.
pub const READY_LINE: &str = "READY";

/// How a worker process ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Clean,
    /// Driver or I/O failure.
    Failure,
    /// A bound port could not be resolved.
    PortNotFound,
}

impl WorkerExit {
    /// Process exit code.
    pub fn code(self) -> i32 {
        match self {
            WorkerExit::Clean => 0,
            WorkerExit::Failure => 1,
            WorkerExit::PortNotFound => 2,
        }
    }

    /// Exit for an error raised while opening ports.
    pub fn from_startup_error(err: &Error) -> Self {
        match err {
            Error::PortNotFound { .. } => WorkerExit::PortNotFound,
            _ => WorkerExit::Failure,
        }
    }
}

/// Tell the owner the worker is up.
pub fn announce_ready() -> Result<()> {
    let mut out = io::stdout().lock();
    writeln!(out, "{}", READY_LINE)?;
    out.flush()?;
    Ok(())
}

/// Message counters for one worker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardStats {
    pub forwarded: u64,
    pub rejected: u64,
    pub failed: u64,
}

/// Validate one message and send it on.
///
/// Invalid messages are dropped; send failures are logged and counted.
pub fn forward_one<T: MessageTarget + ?Sized>(target: &mut T, raw: &[u8], stats: &mut ForwardStats) {
    match validate(raw) {
        Validation::Valid { bytes, .. } => match target.send(bytes) {
            Ok(()) => stats.forwarded += 1,
            Err(e) => {
                warn!("{}", e);
                stats.failed += 1;
            }
        },
        Validation::Invalid(reason) => {
            debug!("Dropping message for {}: {}", target.name(), reason);
            stats.rejected += 1;
        }
    }
}

/// Forward every frame of `reader` to `target` until end of stream.
pub fn forward_frames<R: Read, T: MessageTarget + ?Sized>(
    reader: R,
    target: &mut T,
) -> Result<ForwardStats> {
    let mut frames = FrameReader::new(reader);
    let mut stats = ForwardStats::default();
    while let Some(frame) = frames.read_frame()? {
        forward_one(target, &frame, &mut stats);
    }
    Ok(stats)
}
