//! Application layer - Use case services.
//!
//! This module contains application services that orchestrate
//! domain logic and adapter interactions.
//!
//! Services are designed to be thin orchestrators that:
//! - Accept domain types as inputs
//! - Use ports (traits) for external dependencies
//! - Return domain types as outputs

mod connection_manager;
mod hotplug_monitor;
mod port_registry;

pub use connection_manager::{ConnectionManager, ManagerSettings};
pub use hotplug_monitor::{HotPlugMonitor, MonitorHandle, MonitorSettings};
pub use port_registry::PortRegistry;
