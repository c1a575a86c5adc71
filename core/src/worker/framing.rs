//! Length-prefixed framing for the pipe between the router and a pipe worker.
//!
//! Each frame is an unsigned LEB128 length followed by that many raw bytes.

use std::io::{ErrorKind, Read, Write};

use tracing::warn;

use crate::error::{Error, Result};

/// Largest payload a single frame may carry.
pub const MAX_FRAME_LEN: usize = 65_536;

/// Encode one message as a frame.
pub fn encode_frame(msg: &[u8]) -> Result<Vec<u8>> {
    if msg.len() > MAX_FRAME_LEN {
        return Err(Error::Framing(format!(
            "message of {} bytes exceeds the {} byte frame limit",
            msg.len(),
            MAX_FRAME_LEN
        )));
    }

    let mut frame = Vec::with_capacity(msg.len() + 3);
    let mut len = msg.len();
    loop {
        let byte = (len & 0x7F) as u8;
        len >>= 7;
        if len == 0 {
            frame.push(byte);
            break;
        }
        frame.push(byte | 0x80);
    }
    frame.extend_from_slice(msg);
    Ok(frame)
}

/// Encode and write one frame in a single `write_all`.
pub fn write_frame<W: Write>(writer: &mut W, msg: &[u8]) -> Result<()> {
    let frame = encode_frame(msg)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Reads frames from a byte stream.
///
/// The reader pulls one byte at a time while decoding the length, so wrap
/// unbuffered sources in a `BufReader`.
pub struct FrameReader<R> {
    inner: R,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read the next non-empty frame.
    ///
    /// Returns `Ok(None)` at end of stream. A stream that ends in the middle
    /// of a frame is logged and also reported as end of stream.
    pub fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            let Some(len) = self.read_len()? else {
                return Ok(None);
            };
            if len == 0 {
                continue;
            }
            if len > MAX_FRAME_LEN {
                return Err(Error::Framing(format!(
                    "frame length {} exceeds the {} byte limit",
                    len, MAX_FRAME_LEN
                )));
            }

            let mut payload = vec![0u8; len];
            match self.inner.read_exact(&mut payload) {
                Ok(()) => return Ok(Some(payload)),
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    warn!("Stream ended inside a {} byte frame", len);
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn read_len(&mut self) -> Result<Option<usize>> {
        let mut len: usize = 0;
        let mut shift = 0u32;
        loop {
            let Some(byte) = self.read_byte()? else {
                if shift > 0 {
                    warn!("Stream ended inside a frame length");
                }
                return Ok(None);
            };
            len |= ((byte & 0x7F) as usize) << shift;
            if byte & 0x80 == 0 {
                return Ok(Some(len));
            }
            shift += 7;
            // Three groups already cover MAX_FRAME_LEN.
            if shift > 21 {
                return Err(Error::Framing("frame length varint too long".to_string()));
            }
        }
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut buf = [0u8; 1];
        loop {
            match self.inner.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(buf[0])),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
