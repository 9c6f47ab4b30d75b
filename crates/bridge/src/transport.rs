//! Bulk transport and the USB reader/writer workers
//!
//! [`ReadStream`] and [`BulkWriter`] adapt the accessory's bulk endpoints to
//! `std::io::Read`/`Write`, so the worker loops in this module run unchanged
//! over a real device or an in-memory fake.

use common::channel::{ReaderChannels, WriterChannels};
use common::{Error, FrameOutcome, Result};
use protocol::{Command, CommandStream, ProtocolError, encode_report, write_frame};
use rusb::{Context, DeviceHandle};
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Buffered byte stream over a bulk IN endpoint
///
/// Each refill is one bulk transfer bounded by the read timeout. Timeouts are
/// retried until the paired [`StreamCloser`] fires, after which the stream
/// reports end of input.
pub struct ReadStream {
    handle: Arc<DeviceHandle<Context>>,
    endpoint: u8,
    timeout: Duration,
    buffer: Vec<u8>,
    start: usize,
    end: usize,
    closed: Arc<AtomicBool>,
}

/// Closes a [`ReadStream`] from another thread
#[derive(Debug, Clone)]
pub struct StreamCloser {
    closed: Arc<AtomicBool>,
}

impl StreamCloser {
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl ReadStream {
    pub fn open(
        handle: Arc<DeviceHandle<Context>>,
        endpoint: u8,
        buffer_size: usize,
        timeout: Duration,
    ) -> (Self, StreamCloser) {
        let closed = Arc::new(AtomicBool::new(false));
        let stream = Self {
            handle,
            endpoint,
            timeout,
            buffer: vec![0u8; buffer_size.max(1)],
            start: 0,
            end: 0,
            closed: Arc::clone(&closed),
        };
        (stream, StreamCloser { closed })
    }

    fn fill(&mut self) -> io::Result<usize> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                debug!("Read stream on {:#04x} closed", self.endpoint);
                return Ok(0);
            }
            match self
                .handle
                .read_bulk(self.endpoint, &mut self.buffer, self.timeout)
            {
                Ok(0) | Err(rusb::Error::Timeout) => continue,
                Ok(n) => {
                    trace!("Bulk IN {:#04x}: {} bytes", self.endpoint, n);
                    self.start = 0;
                    self.end = n;
                    return Ok(n);
                }
                Err(e) => return Err(io::Error::other(e)),
            }
        }
    }
}

impl Read for ReadStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.start == self.end && self.fill()? == 0 {
            return Ok(0);
        }
        let n = buf.len().min(self.end - self.start);
        buf[..n].copy_from_slice(&self.buffer[self.start..self.start + n]);
        self.start += n;
        Ok(n)
    }
}

/// Sole writer of the bulk OUT endpoint; every `write` is one bulk transfer
pub struct BulkWriter {
    handle: Arc<DeviceHandle<Context>>,
    endpoint: u8,
    timeout: Duration,
}

impl BulkWriter {
    pub fn new(handle: Arc<DeviceHandle<Context>>, endpoint: u8, timeout: Duration) -> Self {
        Self {
            handle,
            endpoint,
            timeout,
        }
    }
}

impl Write for BulkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self
            .handle
            .write_bulk(self.endpoint, buf, self.timeout)
            .map_err(io::Error::other)?;
        trace!("Bulk OUT {:#04x}: {} bytes", self.endpoint, written);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Recover the USB error hiding inside a framing or decoding I/O error
fn transfer_error(err: ProtocolError) -> Error {
    match err {
        ProtocolError::Io(io_err) => {
            match io_err
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<rusb::Error>())
            {
                Some(usb) => Error::Transfer(*usb),
                None => Error::Io(io_err),
            }
        }
        // serde_json wraps reader failures; unwrap them back to the I/O error
        ProtocolError::Decode(json_err) if json_err.is_io() => {
            transfer_error(ProtocolError::Io(io::Error::from(json_err)))
        }
        other => Error::Codec(other),
    }
}

/// Decode commands from `reader` and hand each to the supervisor
///
/// Returns `Ok` at end of input or once the supervisor stops listening; a
/// malformed value or transport failure is returned as the worker's fault.
pub fn run_reader<R: Read>(reader: R, channels: ReaderChannels) -> Result<()> {
    let mut stream = CommandStream::new(reader);

    for item in stream.by_ref() {
        let command: Command = item.map_err(transfer_error)?;
        debug!("Received command: {}", command);
        if channels.commands.send_blocking(command).is_err() {
            info!("Supervisor gone, reader stopping");
            return Ok(());
        }
    }

    info!("Inbound stream ended after {} bytes", stream.byte_offset());
    Ok(())
}

/// Frame every report from the supervisor onto `writer`
///
/// Emits one [`FrameOutcome`] per report consumed. Returns `Ok` once the
/// report channel closes; a failed transfer ends the worker.
pub fn run_writer<W: Write>(
    mut writer: W,
    channels: WriterChannels,
    max_frame_bytes: Option<usize>,
) -> Result<()> {
    while let Ok(report) = channels.reports.recv_blocking() {
        let body = encode_report(&report)?;

        let outcome = match max_frame_bytes {
            Some(max) if body.len() > max => {
                warn!(
                    "Dropping {} report: {} bytes exceeds frame bound of {}",
                    report.kind(),
                    body.len(),
                    max
                );
                FrameOutcome::Dropped
            }
            _ => {
                write_frame(&mut writer, &body).map_err(transfer_error)?;
                debug!("Sent {} report ({} bytes)", report.kind(), body.len());
                FrameOutcome::Sent
            }
        };

        if channels.outcomes.send_blocking(outcome).is_err() {
            debug!("Supervisor gone, writer stopping");
            break;
        }
    }

    info!("Report channel closed, writer stopping");
    Ok(())
}
