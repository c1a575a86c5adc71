//! Port enumeration application service.

use parking_lot::RwLock;

use crate::domain::{Port, PortDiff, PortDirection, PortSnapshot, RawPorts};
use crate::error::{Error, Result};
use crate::ports::PortEnumerator;

/// Application service for the current port list.
///
/// Enumerates through a `PortEnumerator`, classifies the result against the
/// app's own virtual pairs and caches the latest snapshot.
pub struct PortRegistry<E: PortEnumerator> {
    enumerator: E,
    app_pairs: Vec<String>,
    snapshot: RwLock<PortSnapshot>,
}

impl<E: PortEnumerator> PortRegistry<E> {
    /// Create a registry for the given enumerator and app pair names.
    pub fn new(enumerator: E, app_pairs: Vec<String>) -> Self {
        Self {
            enumerator,
            app_pairs,
            snapshot: RwLock::new(PortSnapshot::default()),
        }
    }

    /// Enumerate once, store the snapshot and return what changed.
    pub async fn refresh(&self) -> Result<PortDiff> {
        let raw = self.enumerator.enumerate().await?;
        let snapshot = PortSnapshot::classify(&raw, &self.app_pairs);

        let mut current = self.snapshot.write();
        let diff = snapshot.diff(&current);
        *current = snapshot;
        Ok(diff)
    }

    /// Enumerate without touching the cached snapshot.
    pub async fn enumerate_raw(&self) -> Result<RawPorts> {
        self.enumerator.enumerate().await
    }

    /// Get the cached snapshot.
    pub fn snapshot(&self) -> PortSnapshot {
        self.snapshot.read().clone()
    }

    /// Find the first port with this direction and name.
    pub fn find(&self, direction: PortDirection, name: &str) -> Result<Port> {
        self.snapshot
            .read()
            .find(direction, name)
            .cloned()
            .ok_or_else(|| Error::PortNotFound {
                direction,
                name: name.to_string(),
            })
    }

    /// Names of the app's own virtual pairs.
    pub fn app_pairs(&self) -> &[String] {
        &self.app_pairs
    }
}
