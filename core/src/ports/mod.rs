//! Ports layer - Trait definitions (interfaces).
//!
//! This module defines the interfaces that the application layer uses
//! to interact with external systems. Implementations live in `adapters`.

mod enumerator;
mod launcher;
mod target;

pub use enumerator::PortEnumerator;
pub use launcher::WorkerLauncher;
pub use target::MessageTarget;
