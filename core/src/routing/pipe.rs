//! Queued writer feeding one pipe worker.

use std::io::Write;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Sender, TrySendError};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::worker::write_frame;

/// Write end of a pipe worker's stdin.
///
/// Messages are queued and written as frames by a dedicated thread that owns
/// the pipe. When the last clone is dropped the thread drains the queue,
/// closes the pipe and the worker sees EOF.
#[derive(Clone)]
pub struct PipeWriter {
    name: Arc<str>,
    tx: Sender<Vec<u8>>,
}

impl PipeWriter {
    /// Start the writer thread for `pipe`.
    pub fn spawn<W>(name: &str, mut pipe: W, capacity: usize) -> Result<Self>
    where
        W: Write + Send + 'static,
    {
        let (tx, rx) = bounded::<Vec<u8>>(capacity.max(1));
        let name: Arc<str> = Arc::from(name);
        let thread_name = Arc::clone(&name);

        thread::Builder::new()
            .name(format!("midicable-pipe-{}", name))
            .spawn(move || {
                for msg in rx {
                    if let Err(e) = write_frame(&mut pipe, &msg) {
                        warn!("Pipe to {} broke: {}", thread_name, e);
                        return;
                    }
                }
                debug!("Pipe to {} closed", thread_name);
            })?;

        Ok(Self { name, tx })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a message without blocking.
    pub fn try_send(&self, msg: &[u8]) -> Result<()> {
        match self.tx.try_send(msg.to_vec()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::SendFailure {
                target: self.name.to_string(),
                reason: "queue full, message dropped".to_string(),
            }),
            Err(TrySendError::Disconnected(_)) => Err(Error::SendFailure {
                target: self.name.to_string(),
                reason: "pipe closed".to_string(),
            }),
        }
    }
}
