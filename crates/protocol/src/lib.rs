//! Wire protocol for the accessory bridge
//!
//! Defines the messages exchanged with the accessory over its bulk endpoints
//! and the codec that moves them across the wire.
//!
//! Inbound traffic is a bare stream of JSON values, one [`Command`] per value.
//! Outbound traffic is framed: every [`OutboundReport`] is written as a 4-byte
//! big-endian length header followed by the JSON body.
//!
//! # Example
//!
//! ```
//! use protocol::{OutboundReport, encode_report, read_frame, write_frame};
//! use std::io::Cursor;
//!
//! let report = OutboundReport::preview("abc123");
//! let body = encode_report(&report).unwrap();
//!
//! let mut wire = Vec::new();
//! write_frame(&mut wire, &body).unwrap();
//! assert_eq!(&wire[..4], &(body.len() as u32).to_be_bytes());
//!
//! let decoded = read_frame(&mut Cursor::new(wire)).unwrap();
//! assert_eq!(decoded, report);
//! ```

pub mod codec;
pub mod error;
pub mod messages;

pub use codec::{
    CommandStream, FRAME_HEADER_LEN, encode_report, frame_header, read_frame, write_frame,
};
pub use error::{ProtocolError, Result};
pub use messages::{Command, FingerprintData, OutboundReport, PreviewData, StartData};
