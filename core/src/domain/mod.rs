//! Domain layer - Pure routing logic and data models.
//!
//! This module contains domain entities that represent core routing concepts.
//! These types have no I/O dependencies and can be tested in isolation.

mod connection;
mod message;
mod port;

// Re-export all domain types
pub use connection::{select_strategy, Connection, ConnectionId, ConnectionStatus, Strategy};
pub use message::{validate, MessageKind, Rejection, Validation};
pub use port::{
    relay_port_name, Port, PortDiff, PortDirection, PortId, PortOrigin, PortSnapshot, RawPorts,
};
