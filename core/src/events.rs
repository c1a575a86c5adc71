//! Events delivered from the routing engine to the presentation layer.

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::domain::{Connection, ConnectionId, ConnectionStatus, PortSnapshot};

/// Something the presentation layer may want to show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Event {
    /// The set of visible ports changed.
    PortListChanged { snapshot: PortSnapshot },
    /// A connection reached a new status.
    ConnectionStatusChanged {
        id: ConnectionId,
        connection: Connection,
        status: ConnectionStatus,
    },
    /// Free-form message worth surfacing to a user.
    Log { message: String },
}

/// One-directional event channel.
///
/// Clones share the same channel. Emitting never blocks and never fails;
/// events are kept until a subscriber takes them.
#[derive(Clone)]
pub struct EventBus {
    tx: Sender<Event>,
    rx: Receiver<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    pub fn emit(&self, event: Event) {
        trace!("Event: {:?}", event);
        // The bus holds its own receiver, so the channel is never disconnected.
        let _ = self.tx.send(event);
    }

    /// Report a connection status change.
    pub fn status(&self, connection: &Connection, status: ConnectionStatus) {
        self.emit(Event::ConnectionStatusChanged {
            id: connection.id,
            connection: connection.clone(),
            status,
        });
    }

    pub fn log(&self, message: impl Into<String>) {
        self.emit(Event::Log {
            message: message.into(),
        });
    }

    /// Receiver for consuming events.
    pub fn subscribe(&self) -> Receiver<Event> {
        self.rx.clone()
    }

    /// Take every event emitted so far.
    pub fn drain(&self) -> Vec<Event> {
        self.rx.try_iter().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
