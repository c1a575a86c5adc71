//! MIDI driver adapter built on `midir`.

use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use tracing::debug;

use crate::domain::{PortDirection, RawPorts};
use crate::error::{Error, Result};
use crate::ports::{MessageTarget, PortEnumerator};

/// The process-wide MIDI driver context.
///
/// Construct it once per process and pass it by reference. Inside a
/// long-running process the driver's port list is cached by the OS, so
/// enumeration through this type does not see hot-plugged devices; the
/// router uses a fresh helper process for that.
pub struct MidiDriver {
    client_name: String,
}

impl MidiDriver {
    /// Open the driver, failing early when no MIDI backend is available.
    pub fn new(client_name: impl Into<String>) -> Result<Self> {
        let client_name = client_name.into();
        MidiInput::new(&client_name).map_err(|e| Error::Midi(e.to_string()))?;
        Ok(Self { client_name })
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    fn input_client(&self) -> Result<MidiInput> {
        let mut input = MidiInput::new(&self.client_name).map_err(|e| Error::Midi(e.to_string()))?;
        input.ignore(Ignore::None);
        Ok(input)
    }

    fn output_client(&self) -> Result<MidiOutput> {
        MidiOutput::new(&self.client_name).map_err(|e| Error::Midi(e.to_string()))
    }

    /// Raw port names in driver order.
    pub fn raw_ports(&self) -> Result<RawPorts> {
        let input = self.input_client()?;
        let output = self.output_client()?;

        // Ports that vanish between listing and naming are skipped.
        let inputs = input
            .ports()
            .iter()
            .filter_map(|p| input.port_name(p).ok())
            .map(|n| port_display_name(&n).to_string())
            .collect();
        let outputs = output
            .ports()
            .iter()
            .filter_map(|p| output.port_name(p).ok())
            .map(|n| port_display_name(&n).to_string())
            .collect();

        Ok(RawPorts { inputs, outputs })
    }

    /// Open the first writable port named `name`.
    pub fn connect_output(&self, name: &str) -> Result<MidiOutputTarget> {
        let output = self.output_client()?;
        let port = output
            .ports()
            .into_iter()
            .find(|p| output.port_name(p).map(|n| port_display_name(&n) == name).unwrap_or(false))
            .ok_or_else(|| Error::PortNotFound {
                direction: PortDirection::Output,
                name: name.to_string(),
            })?;

        let connection = output
            .connect(&port, &format!("{}-out", self.client_name))
            .map_err(|e| Error::Midi(e.to_string()))?;
        debug!("Connected output '{}'", name);

        Ok(MidiOutputTarget {
            name: name.to_string(),
            connection,
        })
    }

    /// Open the first readable port named `name` and call `callback` for
    /// every message received on it.
    pub fn connect_input<F>(&self, name: &str, mut callback: F) -> Result<MidiInputConnection<()>>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        let input = self.input_client()?;
        let port = input
            .ports()
            .into_iter()
            .find(|p| input.port_name(p).map(|n| port_display_name(&n) == name).unwrap_or(false))
            .ok_or_else(|| Error::PortNotFound {
                direction: PortDirection::Input,
                name: name.to_string(),
            })?;

        let connection = input
            .connect(
                &port,
                &format!("{}-in", self.client_name),
                move |_stamp, msg, _| callback(msg),
                (),
            )
            .map_err(|e| Error::Midi(e.to_string()))?;
        debug!("Connected input '{}'", name);

        Ok(connection)
    }

    /// Create a virtual input other applications can write to.
    #[cfg(unix)]
    pub fn create_virtual_input<F>(
        &self,
        name: &str,
        mut callback: F,
    ) -> Result<MidiInputConnection<()>>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        use midir::os::unix::VirtualInput;

        self.input_client()?
            .create_virtual(name, move |_stamp, msg, _| callback(msg), ())
            .map_err(|e| Error::Midi(e.to_string()))
    }

    /// Create a virtual output other applications can read from.
    #[cfg(unix)]
    pub fn create_virtual_output(&self, name: &str) -> Result<MidiOutputTarget> {
        use midir::os::unix::VirtualOutput;

        let connection = self
            .output_client()?
            .create_virtual(name)
            .map_err(|e| Error::Midi(e.to_string()))?;
        Ok(MidiOutputTarget {
            name: name.to_string(),
            connection,
        })
    }
}

/// Port name without ALSA's `client:` prefix and ` client:port` suffix, so
/// a virtual port reads the same as the name it was created with.
fn port_display_name(raw: &str) -> &str {
    if !cfg!(target_os = "linux") {
        return raw;
    }
    strip_alsa_decoration(raw)
}

fn strip_alsa_decoration(raw: &str) -> &str {
    let is_addr = |s: &str| {
        s.split_once(':').is_some_and(|(c, p)| {
            !c.is_empty()
                && !p.is_empty()
                && c.bytes().all(|b| b.is_ascii_digit())
                && p.bytes().all(|b| b.is_ascii_digit())
        })
    };
    // Both the `client:` prefix and the address must be present.
    match raw.rsplit_once(' ') {
        Some((head, addr)) if is_addr(addr) => match head.rsplit_once(':') {
            Some((client, port)) if !client.is_empty() && !port.is_empty() => port,
            _ => raw,
        },
        _ => raw,
    }
}

impl PortEnumerator for MidiDriver {
    async fn enumerate(&self) -> Result<RawPorts> {
        self.raw_ports()
    }
}

/// An open MIDI output.
pub struct MidiOutputTarget {
    name: String,
    connection: MidiOutputConnection,
}

impl MessageTarget for MidiOutputTarget {
    fn send(&mut self, msg: &[u8]) -> Result<()> {
        self.connection.send(msg).map_err(|e| Error::SendFailure {
            target: self.name.clone(),
            reason: e.to_string(),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
