//! Connection domain models and strategy selection.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::port::{Port, PortDirection, PortId, PortOrigin};
use crate::error::{Error, Result};

/// Unique identifier of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How messages travel from source to destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Strategy {
    /// Delivered by the source pair's dispatcher straight to the
    /// destination pair's virtual output.
    InProcess,
    /// Framed over a pipe to a helper bound to the destination.
    PipeWorker,
    /// A helper owns both ends.
    RelayWorker,
}

impl Strategy {
    /// Whether this strategy needs a helper process.
    pub fn uses_worker(&self) -> bool {
        !matches!(self, Strategy::InProcess)
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::InProcess => write!(f, "in-process"),
            Strategy::PipeWorker => write!(f, "pipe worker"),
            Strategy::RelayWorker => write!(f, "relay worker"),
        }
    }
}

/// Pick the forwarding strategy for a pair of endpoint origins.
///
/// | source     | destination | strategy    |
/// |------------|-------------|-------------|
/// | AppVirtual | AppVirtual  | InProcess   |
/// | AppVirtual | External    | PipeWorker  |
/// | External   | any         | RelayWorker |
pub fn select_strategy(source: PortOrigin, destination: PortOrigin) -> Strategy {
    match (source, destination) {
        (PortOrigin::AppVirtual, PortOrigin::AppVirtual) => Strategy::InProcess,
        (PortOrigin::AppVirtual, PortOrigin::External) => Strategy::PipeWorker,
        (PortOrigin::External, _) => Strategy::RelayWorker,
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionStatus {
    Starting,
    Active,
    Failed,
    Closed,
}

impl ConnectionStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionStatus::Failed | ConnectionStatus::Closed)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Starting => write!(f, "starting"),
            ConnectionStatus::Active => write!(f, "OK"),
            ConnectionStatus::Failed => write!(f, "failed"),
            ConnectionStatus::Closed => write!(f, "closed"),
        }
    }
}

/// A route from one input to one output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: ConnectionId,
    pub source: Port,
    pub destination: Port,
    pub strategy: Strategy,
}

impl Connection {
    /// Build a connection, selecting its strategy from the endpoint origins.
    pub fn new(source: Port, destination: Port) -> Result<Self> {
        if source.direction != PortDirection::Input {
            return Err(Error::InvalidConnection(format!(
                "source '{}' is not an input",
                source.name
            )));
        }
        if destination.direction != PortDirection::Output {
            return Err(Error::InvalidConnection(format!(
                "destination '{}' is not an output",
                destination.name
            )));
        }

        let strategy = select_strategy(source.origin, destination.origin);
        Ok(Self {
            id: ConnectionId::new(),
            source,
            destination,
            strategy,
        })
    }

    /// Check if either endpoint is the given port.
    pub fn references(&self, port: &PortId) -> bool {
        self.source.is(port) || self.destination.is(port)
    }

    /// Check if this connection routes the same endpoints as `other`.
    pub fn same_route(&self, other: &Connection) -> bool {
        self.source.id() == other.source.id() && self.destination.id() == other.destination.id()
    }
}

impl std::fmt::Display for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} → {}", self.source, self.destination)
    }
}
