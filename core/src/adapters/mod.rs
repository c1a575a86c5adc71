//! Adapters layer - External system implementations.
//!
//! This module contains implementations of the port traits defined in `ports`.
//! Each adapter handles communication with external systems.

mod enumerator;
mod launcher;
mod midi;

// Re-export main types for convenience
pub use enumerator::FreshEnumerator;
pub use launcher::SubprocessLauncher;
pub use midi::{MidiDriver, MidiOutputTarget};
