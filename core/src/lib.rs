//! midicable Core Library
//!
//! MIDI routing between input and output ports, including devices
//! attached after the process started.
//! Provides functionality to:
//! - Publish virtual port pairs other applications can use
//! - Route messages in-process or through helper subprocesses
//! - Detect hot-plugged and removed devices
//! - Manage user configuration
//!
//! # Architecture
//! This library follows hexagonal architecture (ports & adapters):
//! - `domain`: Pure routing logic and data models
//! - `ports`: Trait definitions (interfaces)
//! - `adapters`: External system implementations
//! - `application`: Use case services
//!
//! # Platform Support
//! - macOS: CoreMIDI
//! - Linux: ALSA sequencer
//! - Windows: WinMM, without virtual ports

// Hexagonal architecture layers
pub mod adapters;
pub mod application;
pub mod domain;
pub mod ports;

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod routing;
pub mod worker;

// Re-export domain types (primary API)
pub use domain::{
    select_strategy, validate, Connection, ConnectionId, ConnectionStatus, MessageKind, Port,
    PortDiff, PortDirection, PortId, PortOrigin, PortSnapshot, RawPorts, Rejection, Strategy,
    Validation,
};

// Re-export other commonly used types
pub use adapters::MidiDriver;
pub use config::{Config, ConfigStore};
pub use engine::Router;
pub use error::{Error, Result};
pub use events::{Event, EventBus};
