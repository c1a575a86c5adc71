//! Port enumerator port (interface).

use crate::domain::RawPorts;
use crate::error::Result;

/// Port for listing the MIDI ports the driver currently reports.
///
/// Implementations differ in freshness: an in-process enumerator sees the
/// driver's cached view, a subprocess-backed one sees current hardware.
pub trait PortEnumerator: Send + Sync {
    /// List raw input and output port names in driver order.
    fn enumerate(&self) -> impl std::future::Future<Output = Result<RawPorts>> + Send;
}
