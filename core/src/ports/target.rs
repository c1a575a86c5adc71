//! Message target port (interface).

use crate::error::Result;

/// Something that accepts validated MIDI messages.
pub trait MessageTarget: Send {
    /// Send one message.
    fn send(&mut self, msg: &[u8]) -> Result<()>;

    /// Name used in log lines.
    fn name(&self) -> &str;
}
