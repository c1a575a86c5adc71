//! Worker launcher port (interface).

use crate::error::Result;
use crate::worker::WorkerHandle;

/// Port for starting helper processes.
///
/// Both methods return only once the helper has confirmed it resolved its
/// ports, or fail with `SpawnFailure`.
pub trait WorkerLauncher: Send + Sync {
    /// Start a helper that writes framed messages from its stdin to `destination`.
    fn spawn_pipe(&self, destination: &str) -> Result<WorkerHandle>;

    /// Start a helper that forwards from `source` to `destination` on its own.
    fn spawn_relay(&self, source: &str, destination: &str) -> Result<WorkerHandle>;
}
