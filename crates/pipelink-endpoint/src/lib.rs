//! Endpoint lifecycle for pipelink.
//!
//! A [`ServerEndpoint`] owns a named channel and serves one peer at a time; a
//! [`ClientEndpoint`] connects to it. The [`Registry`] owns every endpoint a
//! process creates, hands out opaque identifiers, and lets any thread drive
//! them concurrently.
//!
//! ```no_run
//! use pipelink_endpoint::Registry;
//!
//! let registry = Registry::default();
//! let server = registry.create_server("ipc_test")?;
//! let client = registry.connect("ipc_test")?;
//! registry.listen(&server)?;
//! registry.send_from_server(&server, b"hello")?;
//! let message = registry.receive_on_client(&client)?;
//! assert_eq!(message.as_ref(), b"hello");
//! # Ok::<(), pipelink_endpoint::EndpointError>(())
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod registry;
pub mod server;

#[cfg(test)]
mod test_support;

pub use client::{ClientEndpoint, ClientState};
pub use config::EndpointConfig;
pub use error::{EndpointError, Result};
pub use registry::{ClientId, Registry, ServerId};
pub use server::{
    CancelHandle, ListenOutcome, PendingListen, ServerEndpoint, ServerState, StateWatch,
};
