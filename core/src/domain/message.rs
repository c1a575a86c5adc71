//! MIDI 1.0 message validation.
//!
//! Every forwarding path runs incoming bytes through [`validate`] before
//! sending them on, so a malformed message from one device never reaches
//! another.

use serde::{Deserialize, Serialize};

/// Kind of a MIDI 1.0 message, derived from its status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    NoteOff,
    NoteOn,
    PolyPressure,
    ControlChange,
    ProgramChange,
    ChannelPressure,
    PitchBend,
    SysEx,
    TimeCode,
    SongPosition,
    SongSelect,
    TuneRequest,
    EndOfExclusive,
    Clock,
    Start,
    Continue,
    Stop,
    ActiveSensing,
    Reset,
}

impl MessageKind {
    /// Classify a status byte. Data bytes and undefined system statuses
    /// return `None`.
    pub fn from_status(status: u8) -> Option<Self> {
        let kind = match status & 0xF0 {
            0x80 => MessageKind::NoteOff,
            0x90 => MessageKind::NoteOn,
            0xA0 => MessageKind::PolyPressure,
            0xB0 => MessageKind::ControlChange,
            0xC0 => MessageKind::ProgramChange,
            0xD0 => MessageKind::ChannelPressure,
            0xE0 => MessageKind::PitchBend,
            0xF0 => match status {
                0xF0 => MessageKind::SysEx,
                0xF1 => MessageKind::TimeCode,
                0xF2 => MessageKind::SongPosition,
                0xF3 => MessageKind::SongSelect,
                0xF6 => MessageKind::TuneRequest,
                0xF7 => MessageKind::EndOfExclusive,
                0xF8 => MessageKind::Clock,
                0xFA => MessageKind::Start,
                0xFB => MessageKind::Continue,
                0xFC => MessageKind::Stop,
                0xFE => MessageKind::ActiveSensing,
                0xFF => MessageKind::Reset,
                _ => return None,
            },
            _ => return None,
        };
        Some(kind)
    }

    /// Exact length in bytes, or `None` for variable-length SysEx.
    pub fn expected_len(&self) -> Option<usize> {
        match self {
            MessageKind::NoteOff
            | MessageKind::NoteOn
            | MessageKind::PolyPressure
            | MessageKind::ControlChange
            | MessageKind::PitchBend
            | MessageKind::SongPosition => Some(3),
            MessageKind::ProgramChange
            | MessageKind::ChannelPressure
            | MessageKind::TimeCode
            | MessageKind::SongSelect => Some(2),
            MessageKind::SysEx => None,
            MessageKind::TuneRequest
            | MessageKind::EndOfExclusive
            | MessageKind::Clock
            | MessageKind::Start
            | MessageKind::Continue
            | MessageKind::Stop
            | MessageKind::ActiveSensing
            | MessageKind::Reset => Some(1),
        }
    }
}

/// Why a byte sequence was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Empty,
    UnknownStatus(u8),
    Length {
        kind: MessageKind,
        expected: usize,
        actual: usize,
    },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::Empty => write!(f, "empty message"),
            Rejection::UnknownStatus(status) => write!(f, "unknown status byte {:#04x}", status),
            Rejection::Length {
                kind,
                expected,
                actual,
            } => write!(f, "{:?} needs {} bytes, got {}", kind, expected, actual),
        }
    }
}

/// Outcome of [`validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation<'a> {
    /// Forward `bytes`, which may be a prefix of the input.
    Valid { kind: MessageKind, bytes: &'a [u8] },
    Invalid(Rejection),
}

impl<'a> Validation<'a> {
    /// The bytes to forward, if valid.
    pub fn bytes(&self) -> Option<&'a [u8]> {
        match self {
            Validation::Valid { bytes, .. } => Some(bytes),
            Validation::Invalid(_) => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid { .. })
    }
}

/// Classify a raw message and return the bytes that should be forwarded.
///
/// A three-byte program change is accepted and cut down to two bytes; some
/// devices pad it with a stray data byte.
pub fn validate(msg: &[u8]) -> Validation<'_> {
    let Some(&status) = msg.first() else {
        return Validation::Invalid(Rejection::Empty);
    };
    let Some(kind) = MessageKind::from_status(status) else {
        return Validation::Invalid(Rejection::UnknownStatus(status));
    };

    if kind == MessageKind::ProgramChange && msg.len() == 3 {
        return Validation::Valid {
            kind,
            bytes: &msg[..2],
        };
    }

    match kind.expected_len() {
        None => Validation::Valid { kind, bytes: msg },
        Some(expected) if expected == msg.len() => Validation::Valid { kind, bytes: msg },
        Some(expected) => Validation::Invalid(Rejection::Length {
            kind,
            expected,
            actual: msg.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_on() {
        let v = validate(&[0x90, 0x40, 0x7F]);
        assert_eq!(
            v,
            Validation::Valid {
                kind: MessageKind::NoteOn,
                bytes: &[0x90, 0x40, 0x7F]
            }
        );
        assert!(!validate(&[0x90, 0x3C]).is_valid());
        assert!(!validate(&[0x90]).is_valid());
    }

    #[test]
    fn test_program_change() {
        assert_eq!(validate(&[0xC0, 0x05]).bytes(), Some(&[0xC0, 0x05][..]));
        // Padded program change is cut to two bytes.
        assert_eq!(validate(&[0xC0, 0x01, 0x02]).bytes(), Some(&[0xC0, 0x01][..]));
        assert!(!validate(&[0xC0]).is_valid());
        assert!(!validate(&[0xC3, 0x01, 0x02, 0x03]).is_valid());
    }

    #[test]
    fn test_control_change_missing_value() {
        assert_eq!(
            validate(&[0xB0, 0x07]),
            Validation::Invalid(Rejection::Length {
                kind: MessageKind::ControlChange,
                expected: 3,
                actual: 2
            })
        );
        assert!(validate(&[0xB0, 0x07, 0x7F]).is_valid());
    }

    #[test]
    fn test_channel_pressure_is_not_truncated() {
        assert!(validate(&[0xD0, 0x40]).is_valid());
        assert!(!validate(&[0xD0, 0x40, 0x00]).is_valid());
    }

    #[test]
    fn test_empty_and_unknown() {
        assert_eq!(validate(&[]), Validation::Invalid(Rejection::Empty));
        assert_eq!(
            validate(&[0x40, 0x00]),
            Validation::Invalid(Rejection::UnknownStatus(0x40))
        );
        assert_eq!(
            validate(&[0xF4]),
            Validation::Invalid(Rejection::UnknownStatus(0xF4))
        );
        assert!(!validate(&[0xFD]).is_valid());
    }

    #[test]
    fn test_system_messages() {
        assert!(validate(&[0xF8]).is_valid());
        assert!(validate(&[0xFA]).is_valid());
        assert!(validate(&[0xFE]).is_valid());
        assert!(validate(&[0xF1, 0x20]).is_valid());
        assert!(validate(&[0xF3, 0x05]).is_valid());
        assert!(validate(&[0xF2, 0x00, 0x10]).is_valid());
        assert!(!validate(&[0xF8, 0x00]).is_valid());
        assert!(!validate(&[0xF2, 0x00]).is_valid());
    }

    #[test]
    fn test_sysex_any_length() {
        assert!(validate(&[0xF0]).is_valid());
        let long: Vec<u8> = std::iter::once(0xF0)
            .chain((0..500).map(|i| (i % 0x80) as u8))
            .chain(std::iter::once(0xF7))
            .collect();
        assert_eq!(validate(&long).bytes(), Some(&long[..]));
    }

    #[test]
    fn test_rejection_display() {
        let r = Rejection::Length {
            kind: MessageKind::NoteOn,
            expected: 3,
            actual: 1,
        };
        assert_eq!(r.to_string(), "NoteOn needs 3 bytes, got 1");
        assert_eq!(Rejection::UnknownStatus(0xF5).to_string(), "unknown status byte 0xf5");
    }
}
