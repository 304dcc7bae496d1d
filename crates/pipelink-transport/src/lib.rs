//! Named-channel transport for pipelink.
//!
//! Provides one interface over the local duplex channel primitive of each platform:
//! - Unix domain sockets bound under a namespace directory (Linux/macOS)
//! - Named pipes under `\\.\pipe\` (Windows)
//!
//! This is the lowest layer of pipelink. Everything else builds on top of
//! [`PipeServer`], [`connect`] and the [`PipeStream`] they produce.

pub mod error;
pub mod namespace;
pub mod stream;

#[cfg(unix)]
pub mod unix;
#[cfg(unix)]
use unix as sys;

#[cfg(windows)]
pub mod windows;
#[cfg(windows)]
use windows as sys;

pub use error::{Result, TransportError};
pub use namespace::PipeNamespace;
pub use stream::PipeStream;
pub use sys::{connect, Accepted, PendingAccept, PipeServer};
