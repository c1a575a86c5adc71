//! Error types for the midicable-core library.

use std::time::Duration;

use thiserror::Error;

use crate::domain::PortDirection;

/// Result type alias for midicable operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while enumerating ports and routing messages.
#[derive(Error, Debug)]
pub enum Error {
    /// No port with this name exists in the current enumeration.
    #[error("{direction} port '{name}' not found")]
    PortNotFound {
        direction: PortDirection,
        name: String,
    },

    /// A helper process could not start or could not resolve its bound port.
    #[error("Worker failed to start: {0}")]
    SpawnFailure(String),

    /// Delivery of one message to one target failed.
    #[error("Failed to send to {target}: {reason}")]
    SendFailure { target: String, reason: String },

    /// The startup barrier gave up waiting for the virtual ports to appear.
    #[error("Virtual ports not visible after {attempts} enumerations ({waited:?})")]
    EnumerationTimeout { attempts: u32, waited: Duration },

    /// A kill was issued to a process that had already exited.
    #[error("Process {pid} had already exited")]
    TerminationAnomaly { pid: u32 },

    /// The requested source/destination pair cannot form a connection.
    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    /// The same source/destination pair is already routed.
    #[error("Already connected: {0}")]
    AlreadyConnected(String),

    /// A pipe frame could not be encoded or decoded.
    #[error("Framing error: {0}")]
    Framing(String),

    /// The MIDI driver reported an error.
    #[error("MIDI driver error: {0}")]
    Midi(String),

    /// Failed to execute a helper command.
    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    /// Failed to parse command output.
    #[error("Failed to parse output: {0}")]
    ParseError(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Platform not supported.
    #[error("Platform not supported: {0}")]
    UnsupportedPlatform(String),
}
