use std::panic::AssertUnwindSafe;

use pipelink_endpoint::{EndpointConfig, Registry};
use serde_json::Value;
use tracing::{debug, error};

use crate::call::{MethodCall, Operation};
use crate::error::{self, ErrorCode, MethodError, MethodResult};

/// Executes control operations against a [`Registry`].
///
/// `&Dispatcher` is shareable across threads; requests for different
/// identifiers run concurrently.
#[derive(Debug, Default)]
pub struct Dispatcher {
    registry: Registry,
}

impl Dispatcher {
    pub fn new(config: EndpointConfig) -> Self {
        Self::with_registry(Registry::new(config))
    }

    pub fn with_registry(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Decode and execute one call.
    pub fn handle(&self, call: &MethodCall) -> MethodResult {
        let operation = Operation::parse(call)?;
        self.execute(operation)
    }

    /// Execute a decoded operation. A panic inside the operation is reported
    /// as the operation's failure code instead of unwinding into the caller.
    pub fn execute(&self, operation: Operation) -> MethodResult {
        let method = operation.method();
        debug!(method = method.as_str(), "dispatching");
        match std::panic::catch_unwind(AssertUnwindSafe(|| self.run(operation))) {
            Ok(result) => result,
            Err(_) => {
                error!(method = method.as_str(), "panic while handling operation");
                Err(MethodError::new(
                    method.failure_code(),
                    format!("internal error while handling {}", method.as_str()),
                ))
            }
        }
    }

    /// Execute on tokio's blocking pool.
    #[cfg(feature = "async")]
    pub async fn handle_async(self: std::sync::Arc<Self>, call: MethodCall) -> MethodResult {
        let fallback = crate::call::Method::from_name(&call.method)
            .map(crate::call::Method::failure_code)
            .unwrap_or(ErrorCode::NotImplemented);
        let method = call.method.clone();
        tokio::task::spawn_blocking(move || self.handle(&call))
            .await
            .unwrap_or_else(|join_err| {
                Err(MethodError::new(
                    fallback,
                    format!("{method} did not complete: {join_err}"),
                ))
            })
    }

    fn run(&self, operation: Operation) -> MethodResult {
        let registry = &self.registry;
        match operation {
            Operation::CreateServer { pipe_name } => registry
                .create_server(&pipe_name)
                .map(|id| Value::String(id.to_string()))
                .map_err(|err| error::create_server_error(&pipe_name, &err)),
            Operation::Connect { pipe_name } => registry
                .connect(&pipe_name)
                .map(|id| Value::String(id.to_string()))
                .map_err(|err| error::connect_error(&pipe_name, &err)),
            Operation::Listen { server_id } => registry
                .listen(&server_id)
                .map(|()| Value::Bool(true))
                .map_err(|err| error::listen_error(server_id.as_str(), &err)),
            Operation::SendMessageFromServer { server_id, message } => registry
                .send_from_server(&server_id, message.as_bytes())
                .map(|()| Value::Bool(true))
                .map_err(|err| error::server_send_error(&err)),
            Operation::SendMessageFromClient { client_id, message } => registry
                .send_from_client(&client_id, message.as_bytes())
                .map(|()| Value::Bool(true))
                .map_err(|err| error::client_send_error(&err)),
            Operation::ReceiveMessageOnServer { server_id } => registry
                .receive_on_server(&server_id)
                .map_err(|err| error::server_receive_error(&err))
                .and_then(|bytes| decode_text(&bytes)),
            Operation::ReceiveMessageOnClient { client_id } => registry
                .receive_on_client(&client_id)
                .map_err(|err| error::client_receive_error(&err))
                .and_then(|bytes| decode_text(&bytes)),
            Operation::CloseServer { server_id } => registry
                .close_server(&server_id)
                .map(|()| Value::Bool(true))
                .map_err(|err| error::close_server_error(&err)),
            Operation::Disconnect { client_id } => registry
                .disconnect(&client_id)
                .map(|()| Value::Bool(true))
                .map_err(|err| error::disconnect_error(&err)),
        }
    }
}

fn decode_text(bytes: &[u8]) -> MethodResult {
    std::str::from_utf8(bytes)
        .map(|text| Value::String(text.to_string()))
        .map_err(|err| {
            MethodError::new(
                ErrorCode::ReceiveMessageFailed,
                format!("received message is not valid UTF-8: {err}"),
            )
        })
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::test_support::quick_config;

    fn call(dispatcher: &Dispatcher, method: &str, arguments: Value) -> MethodResult {
        dispatcher.handle(&MethodCall::new(method, arguments))
    }

    fn code(result: MethodResult) -> ErrorCode {
        result.unwrap_err().code
    }

    #[test]
    fn end_to_end_scenario() {
        let dispatcher = Arc::new(Dispatcher::new(quick_config("ctl-e2e")));

        let server = call(&dispatcher, "createServer", json!({"pipeName": "alpha"})).unwrap();
        assert_eq!(server, json!("server_1"));

        let listener = {
            let dispatcher = Arc::clone(&dispatcher);
            let server = server.clone();
            thread::spawn(move || call(&dispatcher, "listen", json!({"serverId": server})))
        };
        thread::sleep(Duration::from_millis(20));

        let client = call(&dispatcher, "connect", json!({"pipeName": "alpha"})).unwrap();
        assert_eq!(client, json!("client_1"));
        assert_eq!(listener.join().unwrap().unwrap(), json!(true));

        let sent = call(
            &dispatcher,
            "sendMessageFromServer",
            json!({"serverId": server, "message": "hello"}),
        );
        assert_eq!(sent.unwrap(), json!(true));
        let received = call(&dispatcher, "receiveMessageOnClient", json!({"clientId": client}));
        assert_eq!(received.unwrap(), json!("hello"));

        assert_eq!(
            call(&dispatcher, "disconnect", json!({"clientId": client})).unwrap(),
            json!(true)
        );
        assert_eq!(
            call(&dispatcher, "closeServer", json!({"serverId": server})).unwrap(),
            json!(true)
        );
        assert_eq!(
            code(call(
                &dispatcher,
                "sendMessageFromServer",
                json!({"serverId": server, "message": "late"}),
            )),
            ErrorCode::ServerNotFound
        );
    }

    #[test]
    fn client_to_server_message() {
        let dispatcher = Dispatcher::new(quick_config("ctl-c2s"));
        let server = call(&dispatcher, "createServer", json!({"pipeName": "beta"})).unwrap();
        let client = call(&dispatcher, "connect", json!({"pipeName": "beta"})).unwrap();
        call(&dispatcher, "listen", json!({"serverId": server})).unwrap();

        call(
            &dispatcher,
            "sendMessageFromClient",
            json!({"clientId": client, "message": "ping"}),
        )
        .unwrap();
        let received = call(&dispatcher, "receiveMessageOnServer", json!({"serverId": server}));
        assert_eq!(received.unwrap(), json!("ping"));
    }

    #[test]
    fn unknown_method_is_not_implemented() {
        let dispatcher = Dispatcher::new(quick_config("ctl-unknown"));
        assert_eq!(
            code(call(&dispatcher, "launchRockets", json!({}))),
            ErrorCode::NotImplemented
        );
    }

    #[test]
    fn argument_errors_do_not_touch_registry() {
        let dispatcher = Dispatcher::new(quick_config("ctl-args"));
        assert_eq!(
            code(call(&dispatcher, "createServer", json!({"pipeName": 7}))),
            ErrorCode::InvalidArguments
        );
        assert_eq!(
            code(call(&dispatcher, "createServer", json!({"pipeName": ""}))),
            ErrorCode::InvalidArguments
        );
        assert_eq!(dispatcher.registry().server_count(), 0);
    }

    #[test]
    fn state_gated_send() {
        let dispatcher = Dispatcher::new(quick_config("ctl-gated"));
        let server = call(&dispatcher, "createServer", json!({"pipeName": "gamma"})).unwrap();
        assert_eq!(
            code(call(
                &dispatcher,
                "sendMessageFromServer",
                json!({"serverId": server, "message": "early"}),
            )),
            ErrorCode::ServerNotConnected
        );
    }

    #[test]
    fn at_most_one_server_per_name() {
        let dispatcher = Dispatcher::new(quick_config("ctl-unique"));
        let first = call(&dispatcher, "createServer", json!({"pipeName": "x"})).unwrap();
        let second = call(&dispatcher, "createServer", json!({"pipeName": "x"})).unwrap();
        assert_ne!(first, second);
        assert_eq!(
            code(call(&dispatcher, "listen", json!({"serverId": first}))),
            ErrorCode::ServerNotFound
        );
    }

    #[test]
    fn teardown_of_removed_ids_reports_not_found() {
        let dispatcher = Dispatcher::new(quick_config("ctl-teardown"));
        let server = call(&dispatcher, "createServer", json!({"pipeName": "t"})).unwrap();
        let client = call(&dispatcher, "connect", json!({"pipeName": "t"})).unwrap();

        call(&dispatcher, "disconnect", json!({"clientId": client})).unwrap();
        call(&dispatcher, "closeServer", json!({"serverId": server})).unwrap();
        assert_eq!(
            code(call(&dispatcher, "disconnect", json!({"clientId": client}))),
            ErrorCode::ClientNotFound
        );
        assert_eq!(
            code(call(&dispatcher, "closeServer", json!({"serverId": server}))),
            ErrorCode::ServerNotFound
        );
    }

    #[test]
    fn connect_without_server_is_pipe_connection_failure() {
        let dispatcher = Dispatcher::new(quick_config("ctl-noserver"));
        let err = call(&dispatcher, "connect", json!({"pipeName": "nobody"})).unwrap_err();
        assert_eq!(err.code, ErrorCode::PipeConnectionFailed);
        assert!(err.message.contains("'nobody'"));
        assert_eq!(dispatcher.registry().client_count(), 0);
    }

    #[test]
    fn second_client_before_listen_is_refused() {
        let dispatcher = Dispatcher::new(quick_config("ctl-solo"));
        call(&dispatcher, "createServer", json!({"pipeName": "solo"})).unwrap();
        call(&dispatcher, "connect", json!({"pipeName": "solo"})).unwrap();

        let err = call(&dispatcher, "connect", json!({"pipeName": "solo"})).unwrap_err();
        assert_eq!(err.code, ErrorCode::PipeConnectionFailed);
        assert_eq!(dispatcher.registry().client_count(), 1);
    }

    #[test]
    fn reset_and_reconnect() {
        let dispatcher = Dispatcher::new(quick_config("ctl-reconnect"));
        let server = call(&dispatcher, "createServer", json!({"pipeName": "r"})).unwrap();
        let first = call(&dispatcher, "connect", json!({"pipeName": "r"})).unwrap();
        call(&dispatcher, "listen", json!({"serverId": server})).unwrap();

        let second = call(&dispatcher, "connect", json!({"pipeName": "r"})).unwrap();
        assert_eq!(
            code(call(&dispatcher, "receiveMessageOnClient", json!({"clientId": first}))),
            ErrorCode::ReceiveMessageFailed
        );

        call(&dispatcher, "listen", json!({"serverId": server})).unwrap();
        call(
            &dispatcher,
            "sendMessageFromServer",
            json!({"serverId": server, "message": "welcome back"}),
        )
        .unwrap();
        let received = call(&dispatcher, "receiveMessageOnClient", json!({"clientId": second}));
        assert_eq!(received.unwrap(), json!("welcome back"));
    }

    #[test]
    fn unknown_ids_report_not_found() {
        let dispatcher = Dispatcher::new(quick_config("ctl-ids"));
        assert_eq!(
            code(call(&dispatcher, "listen", json!({"serverId": "server_99"}))),
            ErrorCode::ServerNotFound
        );
        assert_eq!(
            code(call(
                &dispatcher,
                "sendMessageFromClient",
                json!({"clientId": "client_99", "message": "x"}),
            )),
            ErrorCode::ClientNotFound
        );
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn handle_async_runs_on_blocking_pool() {
        let dispatcher = Arc::new(Dispatcher::new(quick_config("ctl-async")));
        let result = Arc::clone(&dispatcher)
            .handle_async(MethodCall::new("createServer", json!({"pipeName": "async"})))
            .await;
        assert_eq!(result.unwrap(), json!("server_1"));

        let result = dispatcher
            .handle_async(MethodCall::new("nope", Value::Null))
            .await;
        assert_eq!(result.unwrap_err().code, ErrorCode::NotImplemented);
    }
}
