use std::fmt;

use pipelink_endpoint::EndpointError;
use serde::{Deserialize, Serialize};

/// Failure kinds reported to control-surface callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidArguments,
    PipeCreationFailed,
    CreateServerFailed,
    ServerResetFailed,
    PipeConnectionFailed,
    ConnectFailed,
    ServerNotFound,
    ListenFailed,
    ServerNotConnected,
    ClientNotFound,
    ClientNotConnected,
    SendMessageFailed,
    ReceiveMessageFailed,
    CloseServerFailed,
    DisconnectFailed,
    NotImplemented,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidArguments => "INVALID_ARGUMENTS",
            ErrorCode::PipeCreationFailed => "PIPE_CREATION_FAILED",
            ErrorCode::CreateServerFailed => "CREATE_SERVER_FAILED",
            ErrorCode::ServerResetFailed => "SERVER_RESET_FAILED",
            ErrorCode::PipeConnectionFailed => "PIPE_CONNECTION_FAILED",
            ErrorCode::ConnectFailed => "CONNECT_FAILED",
            ErrorCode::ServerNotFound => "SERVER_NOT_FOUND",
            ErrorCode::ListenFailed => "LISTEN_FAILED",
            ErrorCode::ServerNotConnected => "SERVER_NOT_CONNECTED",
            ErrorCode::ClientNotFound => "CLIENT_NOT_FOUND",
            ErrorCode::ClientNotConnected => "CLIENT_NOT_CONNECTED",
            ErrorCode::SendMessageFailed => "SEND_MESSAGE_FAILED",
            ErrorCode::ReceiveMessageFailed => "RECEIVE_MESSAGE_FAILED",
            ErrorCode::CloseServerFailed => "CLOSE_SERVER_FAILED",
            ErrorCode::DisconnectFailed => "DISCONNECT_FAILED",
            ErrorCode::NotImplemented => "NOT_IMPLEMENTED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure of a control operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct MethodError {
    pub code: ErrorCode,
    pub message: String,
}

impl MethodError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArguments, message)
    }

    pub fn not_implemented(method: &str) -> Self {
        Self::new(
            ErrorCode::NotImplemented,
            format!("{method} is not implemented"),
        )
    }
}

pub type MethodResult = std::result::Result<serde_json::Value, MethodError>;

/// `"<description> (Code: N)"`, or just the description without an OS code.
fn with_code(description: &str, os_code: Option<i32>) -> String {
    match os_code {
        Some(code) => format!("{description} (Code: {code})"),
        None => description.to_string(),
    }
}

fn server_not_found() -> MethodError {
    MethodError::new(ErrorCode::ServerNotFound, "Server with given ID not found")
}

fn client_not_found() -> MethodError {
    MethodError::new(ErrorCode::ClientNotFound, "Client with given ID not found")
}

pub(crate) fn create_server_error(pipe_name: &str, err: &EndpointError) -> MethodError {
    match err {
        EndpointError::InvalidName(_) => MethodError::invalid_arguments(err.to_string()),
        EndpointError::ChannelCreationFailed {
            os_code, message, ..
        } => MethodError::new(
            ErrorCode::PipeCreationFailed,
            format!(
                "Failed to create named pipe '{pipe_name}': {}",
                with_code(message, *os_code)
            ),
        ),
        other => MethodError::new(ErrorCode::CreateServerFailed, other.to_string()),
    }
}

pub(crate) fn connect_error(pipe_name: &str, err: &EndpointError) -> MethodError {
    let connection_failed = |description: &str| {
        MethodError::new(
            ErrorCode::PipeConnectionFailed,
            format!(
                "Failed to connect to named pipe '{pipe_name}': {}",
                with_code(description, err.os_code())
            ),
        )
    };
    match err {
        EndpointError::InvalidName(_) => MethodError::invalid_arguments(err.to_string()),
        EndpointError::ResetFailed { message, os_code, .. } => MethodError::new(
            ErrorCode::ServerResetFailed,
            format!(
                "Failed to reset server on '{pipe_name}' before connecting: {}",
                with_code(message, *os_code)
            ),
        ),
        EndpointError::NotFound { .. } => connection_failed("no server is listening on this name"),
        EndpointError::Busy { .. } => connection_failed("all pipe instances are busy"),
        EndpointError::ConnectFailed { message, .. } => connection_failed(message),
        other => MethodError::new(ErrorCode::ConnectFailed, other.to_string()),
    }
}

pub(crate) fn listen_error(server_id: &str, err: &EndpointError) -> MethodError {
    match err {
        EndpointError::UnknownServer(_) => server_not_found(),
        EndpointError::ListenFailed { message, os_code, .. } => MethodError::new(
            ErrorCode::ListenFailed,
            format!(
                "Failed to wait for connection on server '{server_id}': {}",
                with_code(message, *os_code)
            ),
        ),
        other => MethodError::new(
            ErrorCode::ListenFailed,
            format!("Failed to wait for connection on server '{server_id}': {other}"),
        ),
    }
}

pub(crate) fn server_send_error(err: &EndpointError) -> MethodError {
    match err {
        EndpointError::UnknownServer(_) => server_not_found(),
        EndpointError::NotConnected => {
            MethodError::new(ErrorCode::ServerNotConnected, "Server is not connected")
        }
        other => MethodError::new(ErrorCode::SendMessageFailed, io_message(other)),
    }
}

pub(crate) fn client_send_error(err: &EndpointError) -> MethodError {
    match err {
        EndpointError::UnknownClient(_) => client_not_found(),
        EndpointError::NotConnected => {
            MethodError::new(ErrorCode::ClientNotConnected, "Client is not connected")
        }
        other => MethodError::new(ErrorCode::SendMessageFailed, io_message(other)),
    }
}

pub(crate) fn server_receive_error(err: &EndpointError) -> MethodError {
    match err {
        EndpointError::UnknownServer(_) => server_not_found(),
        EndpointError::NotConnected => {
            MethodError::new(ErrorCode::ServerNotConnected, "Server is not connected")
        }
        other => MethodError::new(ErrorCode::ReceiveMessageFailed, io_message(other)),
    }
}

pub(crate) fn client_receive_error(err: &EndpointError) -> MethodError {
    match err {
        EndpointError::UnknownClient(_) => client_not_found(),
        EndpointError::NotConnected => {
            MethodError::new(ErrorCode::ClientNotConnected, "Client is not connected")
        }
        other => MethodError::new(ErrorCode::ReceiveMessageFailed, io_message(other)),
    }
}

pub(crate) fn close_server_error(err: &EndpointError) -> MethodError {
    match err {
        EndpointError::UnknownServer(_) => server_not_found(),
        other => MethodError::new(ErrorCode::CloseServerFailed, other.to_string()),
    }
}

pub(crate) fn disconnect_error(err: &EndpointError) -> MethodError {
    match err {
        EndpointError::UnknownClient(_) => client_not_found(),
        other => MethodError::new(ErrorCode::DisconnectFailed, other.to_string()),
    }
}

fn io_message(err: &EndpointError) -> String {
    with_code(&err.to_string(), err.os_code())
}

#[cfg(test)]
mod tests {
    use pipelink_endpoint::ServerId;

    use super::*;

    #[test]
    fn codes_serialize_in_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::PipeCreationFailed).unwrap();
        assert_eq!(json, "\"PIPE_CREATION_FAILED\"");
        let json = serde_json::to_string(&ErrorCode::NotImplemented).unwrap();
        assert_eq!(json, "\"NOT_IMPLEMENTED\"");
    }

    #[test]
    fn display_matches_serialized_name() {
        for code in [
            ErrorCode::InvalidArguments,
            ErrorCode::ServerResetFailed,
            ErrorCode::ClientNotConnected,
            ErrorCode::ReceiveMessageFailed,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{code}\""));
        }
    }

    #[test]
    fn creation_failure_includes_os_code() {
        let err = EndpointError::ChannelCreationFailed {
            name: "alpha".to_string(),
            os_code: Some(5),
            message: "Access is denied.".to_string(),
        };
        let mapped = create_server_error("alpha", &err);
        assert_eq!(mapped.code, ErrorCode::PipeCreationFailed);
        assert_eq!(
            mapped.message,
            "Failed to create named pipe 'alpha': Access is denied. (Code: 5)"
        );
    }

    #[test]
    fn connect_failures_are_classified() {
        let not_found = EndpointError::NotFound {
            name: "alpha".to_string(),
            os_code: Some(2),
        };
        let mapped = connect_error("alpha", &not_found);
        assert_eq!(mapped.code, ErrorCode::PipeConnectionFailed);
        assert!(mapped.message.starts_with("Failed to connect to named pipe 'alpha'"));
        assert!(mapped.message.ends_with("(Code: 2)"));

        let reset = EndpointError::ResetFailed {
            name: "alpha".to_string(),
            os_code: None,
            message: "boom".to_string(),
        };
        assert_eq!(
            connect_error("alpha", &reset).code,
            ErrorCode::ServerResetFailed
        );

        let odd = EndpointError::NotConnected;
        assert_eq!(connect_error("alpha", &odd).code, ErrorCode::ConnectFailed);
    }

    #[test]
    fn lookup_failures_use_fixed_messages() {
        let err = EndpointError::UnknownServer(ServerId::from("server_9"));
        let mapped = server_send_error(&err);
        assert_eq!(mapped.code, ErrorCode::ServerNotFound);
        assert_eq!(mapped.message, "Server with given ID not found");
    }

    #[test]
    fn not_connected_is_state_error_not_send_failure() {
        assert_eq!(
            server_send_error(&EndpointError::NotConnected).code,
            ErrorCode::ServerNotConnected
        );
        assert_eq!(
            client_send_error(&EndpointError::NotConnected).code,
            ErrorCode::ClientNotConnected
        );
    }

    #[test]
    fn method_error_serializes_code_and_message() {
        let err = MethodError::not_implemented("frobnicate");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "NOT_IMPLEMENTED");
        assert_eq!(json["message"], "frobnicate is not implemented");
    }
}
