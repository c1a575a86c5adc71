//! CLI command implementations.

pub mod config;
pub mod list_ports;
pub mod run;
pub mod worker;
