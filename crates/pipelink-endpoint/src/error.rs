use pipelink_frame::FrameError;
use pipelink_transport::TransportError;

use crate::registry::{ClientId, ServerId};

/// Errors that can occur in endpoint and registry operations.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    /// The channel name cannot be used on this platform.
    #[error("invalid channel name: {0}")]
    InvalidName(#[source] TransportError),

    /// The OS refused to create the named channel.
    #[error("failed to create channel '{name}': {message}")]
    ChannelCreationFailed {
        name: String,
        os_code: Option<i32>,
        message: String,
    },

    /// Waiting for a peer failed.
    #[error("failed to wait for connection on '{name}': {message}")]
    ListenFailed {
        name: String,
        os_code: Option<i32>,
        message: String,
    },

    /// Nothing is serving the channel; the server is probably not started.
    #[error("channel '{name}' not found (is the server running?)")]
    NotFound { name: String, os_code: Option<i32> },

    /// The channel already has a connected peer.
    #[error("channel '{name}' is busy")]
    Busy { name: String, os_code: Option<i32> },

    /// Connecting failed for any other reason.
    #[error("failed to connect to '{name}': {message}")]
    ConnectFailed {
        name: String,
        os_code: Option<i32>,
        message: String,
    },

    /// Writing a message failed; the connection may hold a partial message.
    #[error("failed to send message: {message}")]
    SendFailed {
        os_code: Option<i32>,
        message: String,
    },

    /// Reading a message failed.
    #[error("failed to receive message: {message}")]
    ReceiveFailed {
        os_code: Option<i32>,
        message: String,
    },

    /// The peer closed the channel.
    #[error("peer closed the connection")]
    PeerClosed,

    /// Disconnecting the current peer of a server failed.
    #[error("failed to reset server '{name}': {message}")]
    ResetFailed {
        name: String,
        os_code: Option<i32>,
        message: String,
    },

    /// The endpoint has no connected peer.
    #[error("endpoint is not connected")]
    NotConnected,

    /// The operation is not valid in the endpoint's current state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// No server is registered under this identifier.
    #[error("server {0} not found")]
    UnknownServer(ServerId),

    /// No client is registered under this identifier.
    #[error("client {0} not found")]
    UnknownClient(ClientId),
}

impl EndpointError {
    /// Numeric OS error code attached to this error, if any.
    pub fn os_code(&self) -> Option<i32> {
        match self {
            EndpointError::InvalidName(err) => err.os_code(),
            EndpointError::ChannelCreationFailed { os_code, .. }
            | EndpointError::ListenFailed { os_code, .. }
            | EndpointError::NotFound { os_code, .. }
            | EndpointError::Busy { os_code, .. }
            | EndpointError::ConnectFailed { os_code, .. }
            | EndpointError::SendFailed { os_code, .. }
            | EndpointError::ReceiveFailed { os_code, .. }
            | EndpointError::ResetFailed { os_code, .. } => *os_code,
            _ => None,
        }
    }

    pub(crate) fn creation_failed(name: &str, err: &TransportError) -> Self {
        match err {
            TransportError::InvalidName { .. } | TransportError::PathTooLong { .. } => {
                EndpointError::InvalidName(clone_transport_error(err))
            }
            _ => EndpointError::ChannelCreationFailed {
                name: name.to_string(),
                os_code: err.os_code(),
                message: describe_transport(err),
            },
        }
    }

    pub(crate) fn listen_failed(name: &str, err: &TransportError) -> Self {
        EndpointError::ListenFailed {
            name: name.to_string(),
            os_code: err.os_code(),
            message: describe_transport(err),
        }
    }

    pub(crate) fn connect_failed(name: &str, err: TransportError) -> Self {
        let os_code = err.os_code();
        match err {
            TransportError::InvalidName { .. } | TransportError::PathTooLong { .. } => {
                EndpointError::InvalidName(err)
            }
            TransportError::NotFound { .. } => EndpointError::NotFound {
                name: name.to_string(),
                os_code,
            },
            TransportError::Busy { .. } => EndpointError::Busy {
                name: name.to_string(),
                os_code,
            },
            other => EndpointError::ConnectFailed {
                name: name.to_string(),
                os_code,
                message: describe_transport(&other),
            },
        }
    }

    pub(crate) fn reset_failed(name: &str, err: &TransportError) -> Self {
        EndpointError::ResetFailed {
            name: name.to_string(),
            os_code: err.os_code(),
            message: describe_transport(err),
        }
    }

    pub(crate) fn send_failed(err: &FrameError) -> Self {
        match err {
            FrameError::PayloadTooLarge { .. } => EndpointError::SendFailed {
                os_code: None,
                message: err.to_string(),
            },
            _ => EndpointError::SendFailed {
                os_code: err.os_code(),
                message: describe_frame(err),
            },
        }
    }

    pub(crate) fn receive_failed(err: &FrameError) -> Self {
        match err {
            FrameError::ConnectionClosed => EndpointError::PeerClosed,
            _ => EndpointError::ReceiveFailed {
                os_code: err.os_code(),
                message: describe_frame(err),
            },
        }
    }
}

/// The innermost human-readable description of a transport failure.
fn describe_transport(err: &TransportError) -> String {
    match err.io_error() {
        Some(io) => io.to_string(),
        None => err.to_string(),
    }
}

fn describe_frame(err: &FrameError) -> String {
    match err {
        FrameError::Io(io) => io.to_string(),
        other => other.to_string(),
    }
}

fn clone_transport_error(err: &TransportError) -> TransportError {
    match err {
        TransportError::InvalidName { name, reason } => TransportError::InvalidName {
            name: name.clone(),
            reason,
        },
        TransportError::PathTooLong { path, len, max } => TransportError::PathTooLong {
            path: path.clone(),
            len: *len,
            max: *max,
        },
        other => TransportError::Io(std::io::Error::other(other.to_string())),
    }
}

pub type Result<T> = std::result::Result<T, EndpointError>;
