use std::io::{ErrorKind, Read};

use bytes::Bytes;

use crate::codec::{check_limit, HEADER_SIZE};
use crate::error::{FrameError, Result};

/// Read one complete message from a blocking stream.
///
/// Reads exactly the 4-byte length prefix, then exactly that many payload
/// bytes. Nothing beyond the message is consumed, so the stream can be handed
/// to another reader between messages.
///
/// Returns `Err(FrameError::ConnectionClosed)` if the stream ends at either stage.
///
/// A prefix above `max_payload` fails with [`FrameError::PayloadTooLarge`]
/// after only the 4 header bytes were consumed. The payload is still on the
/// stream, so the stream is out of sync and must not be read again.
pub fn read_message<R: Read + ?Sized>(reader: &mut R, max_payload: Option<usize>) -> Result<Bytes> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).map_err(eof_as_closed)?;

    let payload_len = u32::from_le_bytes(header) as usize;
    check_limit(payload_len, max_payload)?;

    // Grow with the data actually received rather than trusting the prefix.
    let mut payload = Vec::with_capacity(payload_len.min(64 * 1024));
    let read = reader
        .take(payload_len as u64)
        .read_to_end(&mut payload)
        .map_err(eof_as_closed)?;
    if read != payload_len {
        return Err(FrameError::ConnectionClosed);
    }

    Ok(Bytes::from(payload))
}

fn eof_as_closed(err: std::io::Error) -> FrameError {
    if err.kind() == ErrorKind::UnexpectedEof {
        FrameError::ConnectionClosed
    } else {
        FrameError::Io(err)
    }
}
