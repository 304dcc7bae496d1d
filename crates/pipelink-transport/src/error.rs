use std::path::PathBuf;

/// Errors that can occur in named-channel transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The logical channel name cannot be mapped into the pipe namespace.
    #[error("invalid channel name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// The mapped channel path is too long for the platform.
    #[error("channel path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// Failed to create the named channel resource.
    #[error("failed to create channel {path}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed while waiting for a peer to connect.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// No channel exists under the requested path (or nobody is listening on it).
    #[error("channel {path} not found: {source}")]
    NotFound {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The channel exists but cannot take another peer right now.
    #[error("channel {path} is busy: {source}")]
    Busy {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the channel for any other reason.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A pending wait was cancelled because the owning endpoint closed.
    #[error("operation cancelled")]
    Cancelled,
}

impl TransportError {
    /// The underlying `std::io::Error`, if this error wraps one.
    pub fn io_error(&self) -> Option<&std::io::Error> {
        match self {
            TransportError::Create { source, .. }
            | TransportError::NotFound { source, .. }
            | TransportError::Busy { source, .. }
            | TransportError::Connect { source, .. }
            | TransportError::Accept(source)
            | TransportError::Io(source) => Some(source),
            TransportError::InvalidName { .. }
            | TransportError::PathTooLong { .. }
            | TransportError::Cancelled => None,
        }
    }

    /// Numeric OS error code attached to this error, if any.
    pub fn os_code(&self) -> Option<i32> {
        self.io_error().and_then(std::io::Error::raw_os_error)
    }

    /// Whether creation failed because the name is transiently held by someone else.
    pub fn is_busy(&self) -> bool {
        match self {
            TransportError::Busy { .. } => true,
            TransportError::Create { source, .. } => crate::sys::is_busy_on_create(source),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
