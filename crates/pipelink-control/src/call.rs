use pipelink_endpoint::{ClientId, ServerId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ErrorCode, MethodError};

/// A named operation with its arguments, as received from the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, arguments: Value) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }
}

/// The closed set of operation names the control surface understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    CreateServer,
    Connect,
    Listen,
    SendMessageFromServer,
    SendMessageFromClient,
    ReceiveMessageOnServer,
    ReceiveMessageOnClient,
    CloseServer,
    Disconnect,
}

impl Method {
    pub const ALL: [Method; 9] = [
        Method::CreateServer,
        Method::Connect,
        Method::Listen,
        Method::SendMessageFromServer,
        Method::SendMessageFromClient,
        Method::ReceiveMessageOnServer,
        Method::ReceiveMessageOnClient,
        Method::CloseServer,
        Method::Disconnect,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|method| method.as_str() == name)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::CreateServer => "createServer",
            Method::Connect => "connect",
            Method::Listen => "listen",
            Method::SendMessageFromServer => "sendMessageFromServer",
            Method::SendMessageFromClient => "sendMessageFromClient",
            Method::ReceiveMessageOnServer => "receiveMessageOnServer",
            Method::ReceiveMessageOnClient => "receiveMessageOnClient",
            Method::CloseServer => "closeServer",
            Method::Disconnect => "disconnect",
        }
    }

    /// Code reported when the operation fails unexpectedly.
    pub fn failure_code(self) -> ErrorCode {
        match self {
            Method::CreateServer => ErrorCode::CreateServerFailed,
            Method::Connect => ErrorCode::ConnectFailed,
            Method::Listen => ErrorCode::ListenFailed,
            Method::SendMessageFromServer | Method::SendMessageFromClient => {
                ErrorCode::SendMessageFailed
            }
            Method::ReceiveMessageOnServer | Method::ReceiveMessageOnClient => {
                ErrorCode::ReceiveMessageFailed
            }
            Method::CloseServer => ErrorCode::CloseServerFailed,
            Method::Disconnect => ErrorCode::DisconnectFailed,
        }
    }
}

/// A fully decoded operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    CreateServer { pipe_name: String },
    Connect { pipe_name: String },
    Listen { server_id: ServerId },
    SendMessageFromServer { server_id: ServerId, message: String },
    SendMessageFromClient { client_id: ClientId, message: String },
    ReceiveMessageOnServer { server_id: ServerId },
    ReceiveMessageOnClient { client_id: ClientId },
    CloseServer { server_id: ServerId },
    Disconnect { client_id: ClientId },
}

impl Operation {
    /// Decode a call. Unknown names yield `NOT_IMPLEMENTED`; missing or
    /// mistyped arguments yield `INVALID_ARGUMENTS`.
    pub fn parse(call: &MethodCall) -> Result<Self, MethodError> {
        let method =
            Method::from_name(&call.method).ok_or_else(|| MethodError::not_implemented(&call.method))?;
        let args = Arguments::new(method, &call.arguments)?;

        let operation = match method {
            Method::CreateServer => Operation::CreateServer {
                pipe_name: args.string("pipeName")?,
            },
            Method::Connect => Operation::Connect {
                pipe_name: args.string("pipeName")?,
            },
            Method::Listen => Operation::Listen {
                server_id: args.string("serverId")?.into(),
            },
            Method::SendMessageFromServer => Operation::SendMessageFromServer {
                server_id: args.string("serverId")?.into(),
                message: args.string("message")?,
            },
            Method::SendMessageFromClient => Operation::SendMessageFromClient {
                client_id: args.string("clientId")?.into(),
                message: args.string("message")?,
            },
            Method::ReceiveMessageOnServer => Operation::ReceiveMessageOnServer {
                server_id: args.string("serverId")?.into(),
            },
            Method::ReceiveMessageOnClient => Operation::ReceiveMessageOnClient {
                client_id: args.string("clientId")?.into(),
            },
            Method::CloseServer => Operation::CloseServer {
                server_id: args.string("serverId")?.into(),
            },
            Method::Disconnect => Operation::Disconnect {
                client_id: args.string("clientId")?.into(),
            },
        };
        Ok(operation)
    }

    pub fn method(&self) -> Method {
        match self {
            Operation::CreateServer { .. } => Method::CreateServer,
            Operation::Connect { .. } => Method::Connect,
            Operation::Listen { .. } => Method::Listen,
            Operation::SendMessageFromServer { .. } => Method::SendMessageFromServer,
            Operation::SendMessageFromClient { .. } => Method::SendMessageFromClient,
            Operation::ReceiveMessageOnServer { .. } => Method::ReceiveMessageOnServer,
            Operation::ReceiveMessageOnClient { .. } => Method::ReceiveMessageOnClient,
            Operation::CloseServer { .. } => Method::CloseServer,
            Operation::Disconnect { .. } => Method::Disconnect,
        }
    }
}

struct Arguments<'a> {
    map: &'a Map<String, Value>,
}

impl<'a> Arguments<'a> {
    fn new(method: Method, value: &'a Value) -> Result<Self, MethodError> {
        value
            .as_object()
            .map(|map| Self { map })
            .ok_or_else(|| {
                MethodError::invalid_arguments(format!("Missing arguments for {}", method.as_str()))
            })
    }

    fn string(&self, key: &str) -> Result<String, MethodError> {
        match self.map.get(key) {
            None => Err(MethodError::invalid_arguments(format!("Missing {key} argument"))),
            Some(Value::String(value)) => Ok(value.clone()),
            Some(_) => Err(MethodError::invalid_arguments(format!(
                "{key} must be a string"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn parse(method: &str, arguments: Value) -> Result<Operation, MethodError> {
        Operation::parse(&MethodCall::new(method, arguments))
    }

    #[test]
    fn parses_every_known_method() {
        let cases = [
            ("createServer", json!({"pipeName": "a"})),
            ("connect", json!({"pipeName": "a"})),
            ("listen", json!({"serverId": "server_1"})),
            ("sendMessageFromServer", json!({"serverId": "server_1", "message": "m"})),
            ("sendMessageFromClient", json!({"clientId": "client_1", "message": "m"})),
            ("receiveMessageOnServer", json!({"serverId": "server_1"})),
            ("receiveMessageOnClient", json!({"clientId": "client_1"})),
            ("closeServer", json!({"serverId": "server_1"})),
            ("disconnect", json!({"clientId": "client_1"})),
        ];
        for (method, arguments) in cases {
            let operation = parse(method, arguments).unwrap();
            assert_eq!(operation.method().as_str(), method);
        }
    }

    #[test]
    fn decodes_argument_values() {
        let operation = parse(
            "sendMessageFromClient",
            json!({"clientId": "client_4", "message": "hello"}),
        )
        .unwrap();
        assert_eq!(
            operation,
            Operation::SendMessageFromClient {
                client_id: ClientId::from("client_4"),
                message: "hello".to_string(),
            }
        );
    }

    #[test]
    fn unknown_method_is_not_implemented() {
        let err = parse("frobnicate", json!({})).unwrap_err();
        assert_eq!(err.code, ErrorCode::NotImplemented);
    }

    #[test]
    fn missing_argument_map() {
        let err = parse("createServer", Value::Null).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArguments);
        assert_eq!(err.message, "Missing arguments for createServer");
    }

    #[test]
    fn missing_key() {
        let err = parse("listen", json!({})).unwrap_err();
        assert_eq!(err.message, "Missing serverId argument");
    }

    #[test]
    fn mistyped_key() {
        let err = parse("connect", json!({"pipeName": 42})).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArguments);
        assert_eq!(err.message, "pipeName must be a string");
    }

    #[test]
    fn method_call_arguments_default_to_null() {
        let call: MethodCall = serde_json::from_str(r#"{"method": "listen"}"#).unwrap();
        assert!(call.arguments.is_null());
    }
}
