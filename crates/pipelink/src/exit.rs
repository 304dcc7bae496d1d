use std::fmt;
use std::io;

use pipelink_endpoint::EndpointError;

// Exit code constants.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;
pub const INTERRUPTED: i32 = 130;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::InvalidData => DATA_INVALID,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn endpoint_error(context: &str, err: EndpointError) -> CliError {
    let code = match &err {
        EndpointError::InvalidName(_) => USAGE,
        EndpointError::ChannelCreationFailed { .. }
        | EndpointError::ListenFailed { .. }
        | EndpointError::NotFound { .. }
        | EndpointError::Busy { .. }
        | EndpointError::ConnectFailed { .. }
        | EndpointError::ResetFailed { .. } => TRANSPORT_ERROR,
        EndpointError::SendFailed { os_code, .. } | EndpointError::ReceiveFailed { os_code, .. } => {
            if is_timeout(*os_code) {
                TIMEOUT
            } else {
                FAILURE
            }
        }
        EndpointError::PeerClosed
        | EndpointError::NotConnected
        | EndpointError::InvalidState { .. } => FAILURE,
        EndpointError::UnknownServer(_) | EndpointError::UnknownClient(_) => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

fn is_timeout(os_code: Option<i32>) -> bool {
    os_code.is_some_and(|code| {
        matches!(
            io::Error::from_raw_os_error(code).kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        )
    })
}
