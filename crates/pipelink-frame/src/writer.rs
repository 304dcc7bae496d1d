use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{check_limit, encode_message};
use crate::error::{FrameError, Result};

/// Write one complete message to a blocking stream and flush it.
///
/// A payload above `max_payload` is rejected before anything reaches the
/// stream. Prefix and payload are encoded into one contiguous buffer and
/// written with a retry loop, so a message is never interleaved with another
/// writer's bytes on the same handle.
///
/// `WouldBlock` and `TimedOut` mean the stream's write timeout expired and
/// are returned as [`FrameError::Io`]. A failure part-way leaves the peer with
/// a truncated message; treat the stream as compromised.
pub fn write_message<W: Write + ?Sized>(
    writer: &mut W,
    payload: &[u8],
    max_payload: Option<usize>,
) -> Result<()> {
    check_limit(payload.len(), max_payload)?;
    let mut buf = BytesMut::new();
    encode_message(payload, &mut buf)?;

    let mut offset = 0usize;
    while offset < buf.len() {
        match writer.write(&buf[offset..]) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => offset += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }

    flush(writer)
}

fn flush<W: Write + ?Sized>(writer: &mut W) -> Result<()> {
    loop {
        match writer.flush() {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
}
