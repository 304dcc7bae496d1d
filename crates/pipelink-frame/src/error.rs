/// Errors that can occur while framing messages.
///
/// Every variant is fatal for the stream except `PayloadTooLarge` raised by a
/// writer, which is checked before any byte is written. A reader raising it
/// has already consumed the length prefix.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds the configured (or encodable) maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing a message.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended before a complete message was transferred.
    #[error("connection closed (incomplete message)")]
    ConnectionClosed,
}

impl FrameError {
    /// Numeric OS error code, when the failure came from the OS.
    pub fn os_code(&self) -> Option<i32> {
        match self {
            FrameError::Io(err) => err.raw_os_error(),
            _ => None,
        }
    }

    /// Whether a blocking read or write gave up because its timeout expired.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            FrameError::Io(err)
                if matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut)
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
