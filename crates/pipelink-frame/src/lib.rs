//! Length-prefixed message framing for pipelink channels.
//!
//! Named channels are byte streams with no inherent message boundaries. Every
//! message is therefore sent as:
//! - A 4-byte little-endian payload length
//! - Exactly that many payload bytes
//!
//! The format is bit-exact with existing peers: no magic, no terminator, no checksum.

#[cfg(feature = "async")]
pub mod async_codec;
pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub use async_codec::MessageCodec;
pub use codec::{decode_message, encode_message, MessageConfig, HEADER_SIZE, MAX_ENCODABLE_PAYLOAD};
pub use error::{FrameError, Result};
pub use reader::read_message;
pub use writer::write_message;
