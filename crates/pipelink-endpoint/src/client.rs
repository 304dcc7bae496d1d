use std::fmt;

use bytes::Bytes;
use pipelink_frame::{read_message, write_message, FrameError};
use pipelink_transport::PipeStream;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EndpointConfig;
use crate::error::{EndpointError, Result};

/// Lifecycle of a [`ClientEndpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    Disconnected,
    Connected,
}

impl ClientState {
    pub fn as_str(self) -> &'static str {
        match self {
            ClientState::Disconnected => "disconnected",
            ClientState::Connected => "connected",
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client side of a named channel.
pub struct ClientEndpoint {
    name: String,
    config: EndpointConfig,
    stream: Option<PipeStream>,
}

impl ClientEndpoint {
    /// A disconnected client for the channel `name`. Nothing is opened yet.
    pub fn new(name: impl Into<String>, config: EndpointConfig) -> Self {
        Self {
            name: name.into(),
            config,
            stream: None,
        }
    }

    /// Open the channel and switch it to message-read mode.
    ///
    /// Does nothing if already connected.
    pub fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let path = self
            .config
            .namespace
            .resolve(&self.name)
            .map_err(EndpointError::InvalidName)?;
        let mut stream = pipelink_transport::connect(&path)
            .map_err(|err| EndpointError::connect_failed(&self.name, err))?;

        let configure = |stream: &mut PipeStream| -> pipelink_transport::Result<()> {
            stream.set_message_mode()?;
            stream.set_read_timeout(self.config.message.read_timeout)?;
            stream.set_write_timeout(self.config.message.write_timeout)
        };
        // Dropping the stream on failure releases the handle.
        configure(&mut stream).map_err(|err| EndpointError::ConnectFailed {
            name: self.name.clone(),
            os_code: err.os_code(),
            message: err.to_string(),
        })?;

        self.stream = Some(stream);
        info!(name = %self.name, "client connected");
        Ok(())
    }

    /// Write one message to the server.
    ///
    /// A payload above the configured maximum is refused without writing.
    pub fn send_message(&mut self, payload: &[u8]) -> Result<()> {
        let max = self.config.message.max_payload_size;
        let stream = self.stream.as_mut().ok_or(EndpointError::NotConnected)?;
        write_message(stream, payload, max).map_err(|err| EndpointError::send_failed(&err))
    }

    /// Read one message from the server.
    ///
    /// An announced payload above the configured maximum leaves the stream
    /// out of sync, so the client disconnects before reporting the failure.
    pub fn receive_message(&mut self) -> Result<Bytes> {
        let max = self.config.message.max_payload_size;
        let stream = self.stream.as_mut().ok_or(EndpointError::NotConnected)?;
        match read_message(stream, max) {
            Ok(message) => Ok(message),
            Err(err @ FrameError::PayloadTooLarge { .. }) => {
                warn!(name = %self.name, error = %err, "oversized message; disconnecting");
                self.disconnect();
                Err(EndpointError::receive_failed(&err))
            }
            Err(err) => Err(EndpointError::receive_failed(&err)),
        }
    }

    /// Release the handle. Idempotent.
    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            debug!(name = %self.name, "client disconnected");
        }
    }

    pub fn state(&self) -> ClientState {
        if self.stream.is_some() {
            ClientState::Connected
        } else {
            ClientState::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ClientEndpoint {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for ClientEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientEndpoint")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::server::ServerEndpoint;
    use crate::test_support::quick_config;

    #[test]
    fn connect_without_server_is_not_found() {
        let config = quick_config("cli-missing");
        let mut client = ClientEndpoint::new("nobody", config);
        let err = client.connect().unwrap_err();
        assert!(matches!(err, EndpointError::NotFound { ref name, .. } if name == "nobody"));
        assert_eq!(client.state(), ClientState::Disconnected);
    }

    #[test]
    fn connect_is_noop_when_connected() {
        let config = quick_config("cli-noop");
        let _server = ServerEndpoint::create("noop", config.clone()).unwrap();
        let mut client = ClientEndpoint::new("noop", config);
        client.connect().unwrap();
        client.connect().unwrap();
        assert!(client.is_connected());
    }

    #[test]
    fn send_and_receive_require_connection() {
        let config = quick_config("cli-gated");
        let mut client = ClientEndpoint::new("gated", config);
        assert!(matches!(
            client.send_message(b"x").unwrap_err(),
            EndpointError::NotConnected
        ));
        assert!(matches!(
            client.receive_message().unwrap_err(),
            EndpointError::NotConnected
        ));
    }

    #[test]
    fn disconnect_is_idempotent() {
        let config = quick_config("cli-disconnect");
        let _server = ServerEndpoint::create("bye", config.clone()).unwrap();
        let mut client = ClientEndpoint::new("bye", config);
        client.connect().unwrap();
        client.disconnect();
        client.disconnect();
        assert_eq!(client.state(), ClientState::Disconnected);
    }

    #[test]
    fn server_sees_peer_closed_after_client_disconnect() {
        let config = quick_config("cli-eof");
        let mut server = ServerEndpoint::create("eof", config.clone()).unwrap();
        let mut client = ClientEndpoint::new("eof", config);
        client.connect().unwrap();
        server.wait_for_connection().unwrap();

        client.disconnect();
        let err = server.receive_message().unwrap_err();
        assert!(matches!(err, EndpointError::PeerClosed));
    }

    #[test]
    fn oversized_message_on_receive_disconnects() {
        let config = quick_config("cli-limit");
        let mut server = ServerEndpoint::create("limit", config.clone()).unwrap();
        let mut client = ClientEndpoint::new("limit", config.with_max_message_size(4));
        client.connect().unwrap();
        server.wait_for_connection().unwrap();

        server.send_message(b"too large").unwrap();
        server.send_message(b"ok").unwrap();
        let err = client.receive_message().unwrap_err();
        assert!(matches!(err, EndpointError::ReceiveFailed { .. }));

        // The rest of the oversized payload is never parsed as a header.
        assert_eq!(client.state(), ClientState::Disconnected);
        assert!(matches!(
            client.receive_message().unwrap_err(),
            EndpointError::NotConnected
        ));
        assert!(matches!(
            server.receive_message().unwrap_err(),
            EndpointError::PeerClosed
        ));
    }

    #[test]
    fn oversized_send_is_refused_without_writing() {
        let config = quick_config("cli-send-limit").with_max_message_size(4);
        let mut server = ServerEndpoint::create("slimit", config.clone()).unwrap();
        let mut client = ClientEndpoint::new("slimit", config);
        client.connect().unwrap();
        server.wait_for_connection().unwrap();

        let err = client.send_message(b"twelve bytes").unwrap_err();
        assert!(matches!(err, EndpointError::SendFailed { os_code: None, .. }));
        assert!(client.is_connected());

        client.send_message(b"fits").unwrap();
        assert_eq!(server.receive_message().unwrap().as_ref(), b"fits");
    }

    #[test]
    fn write_timeout_bounds_a_blocked_send() {
        let config = quick_config("cli-wtimeout")
            .with_write_timeout(Some(std::time::Duration::from_millis(50)));
        let mut server = ServerEndpoint::create("wtimeout", config.clone()).unwrap();
        let mut client = ClientEndpoint::new("wtimeout", config);
        client.connect().unwrap();
        server.wait_for_connection().unwrap();

        let payload = vec![0u8; 32 * 1024 * 1024];
        let started = std::time::Instant::now();
        let err = client.send_message(&payload).unwrap_err();
        assert!(matches!(err, EndpointError::SendFailed { os_code: Some(_), .. }));
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }
}
