use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Message header: a single little-endian u32 payload length.
pub const HEADER_SIZE: usize = 4;

/// Largest payload the 4-byte length prefix can describe.
pub const MAX_ENCODABLE_PAYLOAD: usize = u32::MAX as usize;

/// Encode a message into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────────────┐
/// │ Length       │ Payload          │
/// │ (4B LE u32)  │ (Length bytes)   │
/// └──────────────┴──────────────────┘
/// ```
///
/// No magic, no terminator, no checksum.
pub fn encode_message(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_ENCODABLE_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_ENCODABLE_PAYLOAD,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u32_le(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Decode one message from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete message yet.
/// On success, consumes the message bytes from the buffer.
pub fn decode_message(src: &mut BytesMut, max_payload: Option<usize>) -> Result<Option<Bytes>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(&src[..HEADER_SIZE]);
    let payload_len = u32::from_le_bytes(header) as usize;
    check_limit(payload_len, max_payload)?;

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    Ok(Some(src.split_to(payload_len).freeze()))
}

pub(crate) fn check_limit(size: usize, max_payload: Option<usize>) -> Result<()> {
    match max_payload {
        Some(max) if size > max => Err(FrameError::PayloadTooLarge { size, max }),
        _ => Ok(()),
    }
}

/// Configuration for message framing on a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageConfig {
    /// Maximum payload size in bytes. `None` enforces no limit beyond what the
    /// length prefix can encode.
    pub max_payload_size: Option<usize>,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}
