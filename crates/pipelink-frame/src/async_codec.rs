use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_message, encode_message};
use crate::error::FrameError;

/// `tokio_util` codec for the length-prefixed message format.
#[derive(Debug, Clone, Default)]
pub struct MessageCodec {
    max_payload_size: Option<usize>,
}

impl MessageCodec {
    /// Create a codec with no payload limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec rejecting payloads above `max_payload_size`.
    pub fn with_max_payload(max_payload_size: usize) -> Self {
        Self {
            max_payload_size: Some(max_payload_size),
        }
    }
}

impl Decoder for MessageCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_message(src, self.max_payload_size)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(message) => Ok(Some(message)),
            None if buf.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Bytes> for MessageCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        Encoder::<&[u8]>::encode(self, item.as_ref(), dst)
    }
}

impl Encoder<&[u8]> for MessageCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        crate::codec::check_limit(item.len(), self.max_payload_size)?;
        encode_message(item, dst)
    }
}
