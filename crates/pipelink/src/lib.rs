//! Message passing over named local channels.
//!
//! pipelink connects processes on one machine through named duplex channels
//! (Unix domain sockets or Windows named pipes), preserves message boundaries
//! with a 4-byte length prefix, and manages many server and client endpoints
//! per process behind opaque identifiers.
//!
//! # Crate Structure
//!
//! - [`transport`] — Named-channel primitive per platform
//! - [`frame`] — Length-prefixed message framing
//! - [`endpoint`] — Server/client endpoints and the endpoint registry
//! - [`control`] — Named-operation control surface over the registry

/// Re-export transport types.
pub mod transport {
    pub use pipelink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use pipelink_frame::*;
}

/// Re-export endpoint types.
pub mod endpoint {
    pub use pipelink_endpoint::*;
}

/// Re-export control-surface types.
pub mod control {
    pub use pipelink_control::*;
}

pub use pipelink_control::{Dispatcher, ErrorCode, MethodCall, MethodError};
pub use pipelink_endpoint::{ClientEndpoint, EndpointConfig, Registry, ServerEndpoint};
