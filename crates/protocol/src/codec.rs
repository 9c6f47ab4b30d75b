//! Frame codec
//!
//! # Outbound Frame Format
//!
//! ```text
//! [Length: u32 (big-endian)][JSON body]
//! ```
//!
//! The header and the body are handed to the writer as two separate writes,
//! header first. On a bulk endpoint that means two transfers per frame.
//!
//! # Inbound Stream Format
//!
//! Inbound commands carry no framing at all: the stream is a sequence of JSON
//! values and [`CommandStream`] splits it at value boundaries.

use crate::{Command, OutboundReport, error::ProtocolError, error::Result};
use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use serde_json::de::IoRead;
use std::io::{Read, Write};

/// Length of the big-endian frame header in bytes
pub const FRAME_HEADER_LEN: usize = 4;

/// Serialize a report to its JSON body
pub fn encode_report(report: &OutboundReport) -> Result<Vec<u8>> {
    serde_json::to_vec(report).map_err(ProtocolError::Encode)
}

/// Build the header announcing a body of `len` bytes
///
/// # Example
/// ```
/// use protocol::frame_header;
///
/// assert_eq!(frame_header(300).unwrap(), [0, 0, 1, 44]);
/// ```
pub fn frame_header(len: usize) -> Result<[u8; FRAME_HEADER_LEN]> {
    let len32 = u32::try_from(len).map_err(|_| ProtocolError::FrameTooLarge {
        size: len,
        max: u32::MAX as usize,
    })?;

    let mut header = [0u8; FRAME_HEADER_LEN];
    BigEndian::write_u32(&mut header, len32);
    Ok(header)
}

/// Write one frame: the header, then the body, as two writes
pub fn write_frame<W: Write>(writer: &mut W, body: &[u8]) -> Result<()> {
    let header = frame_header(body.len())?;
    writer.write_all(&header)?;
    writer.write_all(body)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame written by [`write_frame`] and decode its report
pub fn read_frame<R: Read>(reader: &mut R) -> Result<OutboundReport> {
    let length = reader.read_u32::<BigEndian>()? as usize;

    // Grows as bytes arrive; the header alone is not trusted with an allocation
    let mut body = Vec::new();
    reader.by_ref().take(length as u64).read_to_end(&mut body)?;
    if body.len() < length {
        return Err(ProtocolError::IncompleteFrame {
            expected: length,
            actual: body.len(),
        });
    }

    serde_json::from_slice(&body).map_err(ProtocolError::Decode)
}

/// Streaming decoder yielding one [`Command`] per inbound JSON value
///
/// Blocks on the underlying reader between values. After the first error the
/// stream should be abandoned; there is no resynchronization inside a value.
pub struct CommandStream<R: Read> {
    inner: serde_json::StreamDeserializer<'static, IoRead<R>, Command>,
}

impl<R: Read> CommandStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: serde_json::Deserializer::from_reader(reader).into_iter(),
        }
    }

    /// Bytes consumed so far
    pub fn byte_offset(&self) -> usize {
        self.inner.byte_offset()
    }
}

impl<R: Read> Iterator for CommandStream<R> {
    type Item = Result<Command>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|item| item.map_err(ProtocolError::Decode))
    }
}
