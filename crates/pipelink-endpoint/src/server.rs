use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use pipelink_frame::{read_message, write_message, FrameError};
use pipelink_transport::{Accepted, PendingAccept, PipeServer, TransportError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EndpointConfig;
use crate::error::{EndpointError, Result};

/// Lifecycle of a [`ServerEndpoint`].
///
/// ```text
/// Created --listen--> Listening --peer--> Connected
///    ^                    |                   |
///    |                 failure                |
///    +--------------------+------reset--------+
/// any --close--> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ServerState {
    Created,
    Listening,
    Connected,
    Closed,
}

impl ServerState {
    pub fn as_str(self) -> &'static str {
        match self {
            ServerState::Created => "created",
            ServerState::Listening => "listening",
            ServerState::Connected => "connected",
            ServerState::Closed => "closed",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ServerState::Created,
            1 => ServerState::Listening,
            2 => ServerState::Connected,
            _ => ServerState::Closed,
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of a [`ServerEndpoint`]'s state that does not need the
/// endpoint itself, so it can be read while another thread is blocked in a
/// call on it.
#[derive(Debug, Clone)]
pub struct StateWatch(Arc<AtomicU8>);

impl StateWatch {
    fn new(state: ServerState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    fn set(&self, state: ServerState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    pub fn get(&self) -> ServerState {
        ServerState::from_u8(self.0.load(Ordering::SeqCst))
    }
}

/// Server side of a named channel.
///
/// Owns the OS channel from construction until [`close`](Self::close) or drop.
/// Serves one peer at a time; after a peer leaves, call
/// [`reset_for_new_connection`](Self::reset_for_new_connection) and listen again.
pub struct ServerEndpoint {
    name: String,
    path: PathBuf,
    config: EndpointConfig,
    pipe: Option<PipeServer>,
    state: StateWatch,
    cancel: Arc<AtomicBool>,
}

impl ServerEndpoint {
    /// Create the OS channel for `name`.
    ///
    /// If the name is reported busy, waits `create_retry_delay` and tries once
    /// more before giving up.
    pub fn create(name: impl Into<String>, config: EndpointConfig) -> Result<Self> {
        Self::create_with(name.into(), config, |path| PipeServer::create(path))
    }

    /// [`create`](Self::create) with the channel opener supplied by the caller.
    fn create_with<F>(name: String, config: EndpointConfig, mut open: F) -> Result<Self>
    where
        F: FnMut(&Path) -> pipelink_transport::Result<PipeServer>,
    {
        let path = config
            .namespace
            .resolve(&name)
            .map_err(EndpointError::InvalidName)?;
        config
            .namespace
            .ensure_root()
            .map_err(|err| EndpointError::creation_failed(&name, &err))?;

        let pipe = match open(&path) {
            Ok(pipe) => pipe,
            Err(err) if err.is_busy() => {
                warn!(name = %name, error = %err, "channel busy; retrying creation once");
                std::thread::sleep(config.create_retry_delay);
                open(&path).map_err(|err| EndpointError::creation_failed(&name, &err))?
            }
            Err(err) => return Err(EndpointError::creation_failed(&name, &err)),
        };

        info!(name = %name, path = ?path, "server channel created");
        Ok(Self {
            name,
            path,
            config,
            pipe: Some(pipe),
            state: StateWatch::new(ServerState::Created),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Block until a peer connects.
    ///
    /// A peer that connected before this call counts as a success. Returns
    /// [`EndpointError::ListenFailed`] if the endpoint is closed meanwhile.
    pub fn wait_for_connection(&mut self) -> Result<()> {
        let pending = self.begin_listen()?;
        let outcome = pending.wait();
        self.finish_listen(outcome)
    }

    /// First half of [`wait_for_connection`](Self::wait_for_connection).
    ///
    /// Moves the endpoint to `Listening` and returns a handle that can wait
    /// without borrowing the endpoint, so a shared endpoint can be closed by
    /// another thread while the wait is in progress.
    pub fn begin_listen(&mut self) -> Result<PendingListen> {
        if self.state() != ServerState::Created {
            return Err(self.invalid_state("listen"));
        }
        let Some(pipe) = self.pipe.as_mut() else {
            return Err(self.invalid_state("listen"));
        };
        let pending = pipe
            .prepare_accept()
            .map_err(|err| EndpointError::listen_failed(&self.name, &err))?;

        self.state.set(ServerState::Listening);
        debug!(name = %self.name, "listening for a peer");
        Ok(PendingListen {
            name: self.name.clone(),
            pending,
            cancel: Arc::clone(&self.cancel),
            poll_interval: self.config.accept_poll_interval,
        })
    }

    /// Second half of [`wait_for_connection`](Self::wait_for_connection).
    ///
    /// A listen ended by a [`CancelHandle`] clears the cancellation, so the
    /// next listen waits normally.
    pub fn finish_listen(&mut self, outcome: ListenOutcome) -> Result<()> {
        match self.state() {
            ServerState::Closed => {
                return Err(EndpointError::listen_failed(
                    &self.name,
                    &TransportError::Cancelled,
                ))
            }
            ServerState::Listening => {}
            _ => return Err(self.invalid_state("finish listening")),
        }

        match outcome.result {
            Ok(accepted) => {
                let Some(pipe) = self.pipe.as_mut() else {
                    return Err(self.invalid_state("finish listening"));
                };
                pipe.attach(accepted);
                if let Err(err) = apply_timeouts(pipe, &self.config) {
                    warn!(name = %self.name, error = %err, "failed to apply stream timeouts");
                }
                self.state.set(ServerState::Connected);
                info!(name = %self.name, "peer connected");
                Ok(())
            }
            Err(err) => {
                if matches!(err, TransportError::Cancelled) {
                    self.cancel.store(false, Ordering::SeqCst);
                }
                self.state.set(ServerState::Created);
                debug!(name = %self.name, error = %err, "listen failed");
                Err(EndpointError::listen_failed(&self.name, &err))
            }
        }
    }

    /// Write one message to the connected peer.
    ///
    /// A payload over the configured maximum is refused before anything is
    /// written.
    pub fn send_message(&mut self, payload: &[u8]) -> Result<()> {
        let max = self.config.message.max_payload_size;
        let peer = self.connected_peer()?;
        write_message(peer, payload, max).map_err(|err| EndpointError::send_failed(&err))
    }

    /// Read one message from the connected peer.
    ///
    /// An oversized message leaves its body unread on the stream, so the peer
    /// is dropped and the endpoint returns to `Created`.
    pub fn receive_message(&mut self) -> Result<Bytes> {
        let max = self.config.message.max_payload_size;
        let peer = self.connected_peer()?;
        match read_message(peer, max) {
            Ok(message) => Ok(message),
            Err(err @ FrameError::PayloadTooLarge { .. }) => {
                warn!(name = %self.name, error = %err, "oversized message; dropping peer");
                self.drop_peer();
                Err(EndpointError::receive_failed(&err))
            }
            Err(err) => Err(EndpointError::receive_failed(&err)),
        }
    }

    /// Whether this server's single peer slot is taken.
    ///
    /// Counts an attached peer as well as a connection waiting to be
    /// accepted. Extra waiting connections are refused. While a listen is in
    /// progress the slot belongs to that listen and counts as free.
    pub fn peer_slot_taken(&mut self) -> Result<bool> {
        match self.state() {
            ServerState::Connected => return Ok(true),
            ServerState::Created => {}
            ServerState::Listening | ServerState::Closed => return Ok(false),
        }
        let Some(pipe) = self.pipe.as_mut() else {
            return Ok(false);
        };
        pipe.peer_slot_taken()
            .map_err(|err| EndpointError::connect_failed(&self.name, err))
    }

    /// Drop the current peer, if any, and return to `Created`.
    ///
    /// The channel name stays claimed throughout.
    pub fn reset_for_new_connection(&mut self) -> Result<()> {
        if matches!(self.state(), ServerState::Listening | ServerState::Closed) {
            return Err(self.invalid_state("reset"));
        }
        let Some(pipe) = self.pipe.as_mut() else {
            return Err(self.invalid_state("reset"));
        };

        let had_peer = pipe
            .disconnect_peer()
            .map_err(|err| EndpointError::reset_failed(&self.name, &err))?;
        self.state.set(ServerState::Created);
        std::thread::sleep(self.config.reset_settle_delay);

        debug!(name = %self.name, had_peer, "server reset for a new connection");
        Ok(())
    }

    /// Release the OS channel. Idempotent.
    ///
    /// A listen in progress on another thread observes the close within one
    /// accept poll interval and fails.
    pub fn close(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(mut pipe) = self.pipe.take() {
            if let Err(err) = pipe.disconnect_peer() {
                debug!(name = %self.name, error = %err, "peer disconnect during close failed");
            }
            drop(pipe);
            info!(name = %self.name, "server channel closed");
        }
        self.state.set(ServerState::Closed);
    }

    pub fn state(&self) -> ServerState {
        self.state.get()
    }

    /// A view of this endpoint's state that stays readable while the
    /// endpoint is locked elsewhere.
    pub fn state_watch(&self) -> StateWatch {
        self.state.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ServerState::Connected
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS path of the channel.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A handle that ends pending listens on this endpoint from another thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancel))
    }

    fn connected_peer(&mut self) -> Result<&mut pipelink_transport::PipeStream> {
        if self.state() != ServerState::Connected {
            return Err(EndpointError::NotConnected);
        }
        self.pipe
            .as_mut()
            .and_then(PipeServer::peer_mut)
            .ok_or(EndpointError::NotConnected)
    }

    fn drop_peer(&mut self) {
        if let Some(pipe) = self.pipe.as_mut() {
            if let Err(err) = pipe.disconnect_peer() {
                debug!(name = %self.name, error = %err, "peer disconnect failed");
            }
        }
        self.state.set(ServerState::Created);
    }

    fn invalid_state(&self, operation: &'static str) -> EndpointError {
        EndpointError::InvalidState {
            operation,
            state: self.state().as_str(),
        }
    }
}

impl Drop for ServerEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerEndpoint")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("state", &self.state())
            .finish()
    }
}

/// Aborts the pending listen of one [`ServerEndpoint`].
///
/// A cancel issued while no listen is pending ends the next one. Closing the
/// endpoint ends every later listen.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A listen started by [`ServerEndpoint::begin_listen`].
#[derive(Debug)]
pub struct PendingListen {
    name: String,
    pending: PendingAccept,
    cancel: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl PendingListen {
    /// Block until a peer connects or the endpoint is closed.
    pub fn wait(self) -> ListenOutcome {
        let result = self.pending.wait(&self.cancel, self.poll_interval);
        ListenOutcome { result }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Result of [`PendingListen::wait`], to be handed to
/// [`ServerEndpoint::finish_listen`].
#[derive(Debug)]
pub struct ListenOutcome {
    result: pipelink_transport::Result<Accepted>,
}

fn apply_timeouts(pipe: &mut PipeServer, config: &EndpointConfig) -> pipelink_transport::Result<()> {
    if let Some(peer) = pipe.peer_mut() {
        peer.set_read_timeout(config.message.read_timeout)?;
        peer.set_write_timeout(config.message.write_timeout)?;
    }
    Ok(())
}
