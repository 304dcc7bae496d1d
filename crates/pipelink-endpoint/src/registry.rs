use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::ClientEndpoint;
use crate::config::EndpointConfig;
use crate::error::{EndpointError, Result};
use crate::server::{ServerEndpoint, ServerState, StateWatch};

/// Opaque identifier of a registered server, e.g. `server_1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

/// Opaque identifier of a registered client, e.g. `client_1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

macro_rules! impl_id {
    ($ty:ident) => {
        impl $ty {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $ty {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $ty {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

impl_id!(ServerId);
impl_id!(ClientId);

type Shared<T> = Arc<Mutex<T>>;

#[derive(Clone)]
struct ServerEntry {
    endpoint: Shared<ServerEndpoint>,
    state: StateWatch,
}

#[derive(Default)]
struct Tables {
    servers: HashMap<ServerId, ServerEntry>,
    clients: HashMap<ClientId, Shared<ClientEndpoint>>,
    server_names: HashMap<String, ServerId>,
}

/// Process-wide owner of every live endpoint.
///
/// Hands out identifiers that are never reused and keeps at most one server
/// per channel name. Operations on different endpoints run concurrently;
/// each endpoint serializes its own operations. A listen releases its
/// endpoint while it waits, so the endpoint can be closed from another thread.
pub struct Registry {
    config: EndpointConfig,
    tables: Mutex<Tables>,
    next_server_id: AtomicU64,
    next_client_id: AtomicU64,
}

impl Registry {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            tables: Mutex::new(Tables::default()),
            next_server_id: AtomicU64::new(1),
            next_client_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Create a server for `name`, closing any server already registered
    /// under that name first.
    pub fn create_server(&self, name: &str) -> Result<ServerId> {
        if let Some(previous) = self.evict_server_named(name) {
            info!(name, "replacing existing server");
            lock(&previous).close();
        }

        let endpoint = ServerEndpoint::create(name, self.config.clone())?;
        let entry = ServerEntry {
            state: endpoint.state_watch(),
            endpoint: Arc::new(Mutex::new(endpoint)),
        };
        let id = ServerId(format!(
            "server_{}",
            self.next_server_id.fetch_add(1, Ordering::Relaxed)
        ));

        // A concurrent create for the same name may have won the race.
        let displaced = {
            let mut tables = lock(&self.tables);
            let displaced = tables
                .server_names
                .insert(name.to_string(), id.clone())
                .and_then(|old| tables.servers.remove(&old));
            tables.servers.insert(id.clone(), entry);
            displaced
        };
        if let Some(previous) = displaced {
            lock(&previous.endpoint).close();
        }

        debug!(%id, name, "server registered");
        Ok(id)
    }

    /// Connect a new client to `name`.
    ///
    /// If a registered server for that name currently has a peer, it is reset
    /// first so the new client can take its place. Fails with
    /// [`EndpointError::Busy`] if another client is already waiting for that
    /// server to listen, or if the server is blocked in another call.
    pub fn connect(&self, name: &str) -> Result<ClientId> {
        if let Some(server) = self.server_named(name) {
            claim_peer_slot(&server, name)?;
        }
        std::thread::sleep(self.config.connect_settle_delay);

        let mut endpoint = ClientEndpoint::new(name, self.config.clone());
        endpoint.connect()?;

        let id = ClientId(format!(
            "client_{}",
            self.next_client_id.fetch_add(1, Ordering::Relaxed)
        ));
        lock(&self.tables)
            .clients
            .insert(id.clone(), Arc::new(Mutex::new(endpoint)));
        debug!(%id, name, "client registered");
        Ok(id)
    }

    /// Block until a peer connects to the server `id`.
    #[allow(clippy::let_and_return)]
    pub fn listen(&self, id: &ServerId) -> Result<()> {
        let server = self.server(id)?;
        let pending = lock(&server).begin_listen()?;
        let outcome = pending.wait();
        // Bound first so the guard drops before `server`.
        let result = lock(&server).finish_listen(outcome);
        result
    }

    pub fn send_from_server(&self, id: &ServerId, payload: &[u8]) -> Result<()> {
        let server = self.server(id)?;
        let mut guard = lock(&server);
        guard.send_message(payload)
    }

    pub fn send_from_client(&self, id: &ClientId, payload: &[u8]) -> Result<()> {
        let client = self.client(id)?;
        let mut guard = lock(&client);
        guard.send_message(payload)
    }

    pub fn receive_on_server(&self, id: &ServerId) -> Result<Bytes> {
        let server = self.server(id)?;
        let mut guard = lock(&server);
        guard.receive_message()
    }

    pub fn receive_on_client(&self, id: &ClientId) -> Result<Bytes> {
        let client = self.client(id)?;
        let mut guard = lock(&client);
        guard.receive_message()
    }

    /// Close the server `id` and drop it from the registry.
    pub fn close_server(&self, id: &ServerId) -> Result<()> {
        let server = self.server(id)?;
        lock(&server).close();

        let mut tables = lock(&self.tables);
        tables.servers.remove(id);
        tables.server_names.retain(|_, registered| registered != id);
        drop(tables);

        debug!(%id, "server removed");
        Ok(())
    }

    /// Disconnect the client `id` and drop it from the registry.
    pub fn disconnect(&self, id: &ClientId) -> Result<()> {
        let client = self.client(id)?;
        lock(&client).disconnect();
        lock(&self.tables).clients.remove(id);
        debug!(%id, "client removed");
        Ok(())
    }

    /// Last recorded state of the server `id`. Never waits on the server.
    pub fn server_state(&self, id: &ServerId) -> Result<ServerState> {
        lock(&self.tables)
            .servers
            .get(id)
            .map(|entry| entry.state.get())
            .ok_or_else(|| EndpointError::UnknownServer(id.clone()))
    }

    /// Identifier of the server registered under `name`.
    pub fn server_id_for(&self, name: &str) -> Option<ServerId> {
        lock(&self.tables).server_names.get(name).cloned()
    }

    pub fn server_count(&self) -> usize {
        lock(&self.tables).servers.len()
    }

    pub fn client_count(&self) -> usize {
        lock(&self.tables).clients.len()
    }

    /// Close every server and disconnect every client.
    pub fn close_all(&self) {
        let (servers, clients) = {
            let mut tables = lock(&self.tables);
            tables.server_names.clear();
            (
                std::mem::take(&mut tables.servers),
                std::mem::take(&mut tables.clients),
            )
        };
        if servers.is_empty() && clients.is_empty() {
            return;
        }
        info!(
            servers = servers.len(),
            clients = clients.len(),
            "closing all endpoints"
        );
        for client in clients.values() {
            lock(client).disconnect();
        }
        for entry in servers.values() {
            lock(&entry.endpoint).close();
        }
    }

    fn server(&self, id: &ServerId) -> Result<Shared<ServerEndpoint>> {
        lock(&self.tables)
            .servers
            .get(id)
            .map(|entry| Arc::clone(&entry.endpoint))
            .ok_or_else(|| EndpointError::UnknownServer(id.clone()))
    }

    fn client(&self, id: &ClientId) -> Result<Shared<ClientEndpoint>> {
        lock(&self.tables)
            .clients
            .get(id)
            .cloned()
            .ok_or_else(|| EndpointError::UnknownClient(id.clone()))
    }

    fn server_named(&self, name: &str) -> Option<ServerEntry> {
        let tables = lock(&self.tables);
        let id = tables.server_names.get(name)?;
        tables.servers.get(id).cloned()
    }

    fn evict_server_named(&self, name: &str) -> Option<Shared<ServerEndpoint>> {
        let mut tables = lock(&self.tables);
        let id = tables.server_names.remove(name)?;
        tables.servers.remove(&id).map(|entry| entry.endpoint)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(EndpointConfig::default())
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.close_all();
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("servers", &self.server_count())
            .field("clients", &self.client_count())
            .finish()
    }
}

/// Make room on `server` for one new client.
///
/// A server still holding a previous session is reset. A server whose slot
/// is held by a client that has not been accepted yet refuses with `Busy`,
/// as does a connected server blocked in a send or receive.
fn claim_peer_slot(server: &ServerEntry, name: &str) -> Result<()> {
    let busy = || EndpointError::Busy {
        name: name.to_string(),
        os_code: None,
    };
    let mut guard = match server.endpoint.try_lock() {
        Ok(guard) => guard,
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        Err(TryLockError::WouldBlock) if server.state.get() == ServerState::Connected => {
            debug!(name, "server busy in another call; refusing connect");
            return Err(busy());
        }
        // Held briefly by a listen starting or a reset settling.
        Err(TryLockError::WouldBlock) => lock(&server.endpoint),
    };
    if guard.state() == ServerState::Connected {
        guard.reset_for_new_connection().inspect_err(|err| {
            warn!(name, error = %err, "server reset before connect failed");
        })?;
    }
    if guard.peer_slot_taken()? {
        debug!(name, "a client is already waiting; refusing connect");
        return Err(busy());
    }
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(all(test, unix))]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::test_support::quick_config;

    fn registry(tag: &str) -> Registry {
        Registry::new(quick_config(tag))
    }

    #[test]
    fn ids_are_sequential_and_never_reused() {
        let registry = registry("reg-ids");
        let first = registry.create_server("one").unwrap();
        let second = registry.create_server("two").unwrap();
        assert_eq!(first.as_str(), "server_1");
        assert_eq!(second.as_str(), "server_2");

        registry.close_server(&first).unwrap();
        let third = registry.create_server("one").unwrap();
        assert_eq!(third.as_str(), "server_3");

        let client = registry.connect("two").unwrap();
        assert_eq!(client.as_str(), "client_1");
    }

    #[test]
    fn end_to_end_exchange() {
        let registry = registry("reg-e2e");
        let server = registry.create_server("ipc_test").unwrap();
        let client = registry.connect("ipc_test").unwrap();
        registry.listen(&server).unwrap();

        registry.send_from_server(&server, b"hello").unwrap();
        assert_eq!(registry.receive_on_client(&client).unwrap().as_ref(), b"hello");
        registry.send_from_client(&client, b"hi").unwrap();
        assert_eq!(registry.receive_on_server(&server).unwrap().as_ref(), b"hi");

        registry.disconnect(&client).unwrap();
        registry.close_server(&server).unwrap();

        assert!(matches!(
            registry.send_from_server(&server, b"x").unwrap_err(),
            EndpointError::UnknownServer(_)
        ));
        assert!(matches!(
            registry.disconnect(&client).unwrap_err(),
            EndpointError::UnknownClient(_)
        ));
        assert_eq!(registry.server_count(), 0);
        assert_eq!(registry.client_count(), 0);
    }

    #[test]
    fn at_most_one_server_per_name() {
        let registry = registry("reg-unique");
        let old = registry.create_server("x").unwrap();
        let new = registry.create_server("x").unwrap();

        assert_ne!(old, new);
        assert_eq!(registry.server_count(), 1);
        assert_eq!(registry.server_id_for("x"), Some(new.clone()));
        assert!(matches!(
            registry.listen(&old).unwrap_err(),
            EndpointError::UnknownServer(_)
        ));
        assert_eq!(registry.server_state(&new).unwrap(), ServerState::Created);
    }

    #[test]
    fn send_before_listen_is_not_connected() {
        let registry = registry("reg-gated");
        let server = registry.create_server("gated").unwrap();
        let err = registry.send_from_server(&server, b"early").unwrap_err();
        assert!(matches!(err, EndpointError::NotConnected));
        assert_eq!(registry.server_state(&server).unwrap(), ServerState::Created);
    }

    #[test]
    fn connect_without_server_fails_and_registers_nothing() {
        let registry = registry("reg-missing");
        let err = registry.connect("nobody").unwrap_err();
        assert!(matches!(err, EndpointError::NotFound { .. }));
        assert_eq!(registry.client_count(), 0);
    }

    #[test]
    fn failed_create_registers_nothing() {
        let registry = registry("reg-bad-name");
        assert!(registry.create_server("").is_err());
        assert_eq!(registry.server_count(), 0);
    }

    #[test]
    fn reconnect_resets_connected_server() {
        let registry = registry("reg-reconnect");
        let server = registry.create_server("again").unwrap();

        let first = registry.connect("again").unwrap();
        registry.listen(&server).unwrap();
        assert_eq!(registry.server_state(&server).unwrap(), ServerState::Connected);

        let second = registry.connect("again").unwrap();
        assert_eq!(registry.server_state(&server).unwrap(), ServerState::Created);
        assert!(matches!(
            registry.receive_on_client(&first).unwrap_err(),
            EndpointError::PeerClosed
        ));

        registry.listen(&server).unwrap();
        registry.send_from_client(&second, b"second").unwrap();
        assert_eq!(registry.receive_on_server(&server).unwrap().as_ref(), b"second");
    }

    #[test]
    fn second_waiting_client_is_busy() {
        let registry = registry("reg-solo");
        let server = registry.create_server("solo").unwrap();
        let first = registry.connect("solo").unwrap();

        let err = registry.connect("solo").unwrap_err();
        assert!(matches!(err, EndpointError::Busy { ref name, .. } if name == "solo"));
        assert_eq!(registry.client_count(), 1);

        registry.listen(&server).unwrap();
        registry.send_from_client(&first, b"first").unwrap();
        assert_eq!(registry.receive_on_server(&server).unwrap().as_ref(), b"first");
    }

    #[test]
    fn slot_frees_when_waiting_client_leaves() {
        let registry = registry("reg-solo-leave");
        let server = registry.create_server("solo").unwrap();
        let first = registry.connect("solo").unwrap();
        registry.disconnect(&first).unwrap();

        let second = registry.connect("solo").unwrap();
        registry.listen(&server).unwrap();
        registry.send_from_client(&second, b"second").unwrap();
        assert_eq!(registry.receive_on_server(&server).unwrap().as_ref(), b"second");
    }

    #[test]
    fn connect_while_server_blocked_is_busy() {
        let registry = Arc::new(registry("reg-blocked"));
        let server = registry.create_server("blocked").unwrap();
        let client = registry.connect("blocked").unwrap();
        registry.listen(&server).unwrap();

        let receiver = {
            let registry = Arc::clone(&registry);
            let server = server.clone();
            thread::spawn(move || registry.receive_on_server(&server))
        };
        thread::sleep(Duration::from_millis(30));

        assert_eq!(registry.server_state(&server).unwrap(), ServerState::Connected);
        assert!(matches!(
            registry.connect("blocked").unwrap_err(),
            EndpointError::Busy { .. }
        ));

        registry.send_from_client(&client, b"unblock").unwrap();
        assert_eq!(receiver.join().unwrap().unwrap().as_ref(), b"unblock");
    }

    #[test]
    fn server_state_is_current_during_reset() {
        let mut config = quick_config("reg-settle");
        config.reset_settle_delay = Duration::from_millis(300);
        let registry = Arc::new(Registry::new(config));
        let server = registry.create_server("settle").unwrap();
        registry.connect("settle").unwrap();
        registry.listen(&server).unwrap();

        let reconnect = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.connect("settle"))
        };
        thread::sleep(Duration::from_millis(100));

        assert_eq!(registry.server_state(&server).unwrap(), ServerState::Created);
        reconnect.join().unwrap().unwrap();
    }

    #[test]
    fn close_server_cancels_blocked_listen() {
        let registry = Arc::new(registry("reg-cancel"));
        let server = registry.create_server("waiting").unwrap();

        let listener = {
            let registry = Arc::clone(&registry);
            let server = server.clone();
            thread::spawn(move || registry.listen(&server))
        };
        thread::sleep(Duration::from_millis(30));
        registry.close_server(&server).unwrap();

        let err = listener.join().unwrap().unwrap_err();
        assert!(matches!(err, EndpointError::ListenFailed { .. }));
        assert_eq!(registry.server_count(), 0);
    }

    #[test]
    fn close_all_is_idempotent() {
        let registry = registry("reg-close-all");
        registry.create_server("a").unwrap();
        registry.create_server("b").unwrap();
        registry.connect("a").unwrap();

        registry.close_all();
        registry.close_all();
        assert_eq!(registry.server_count(), 0);
        assert_eq!(registry.client_count(), 0);
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = ServerId::from("server_7");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"server_7\"");
        let back: ClientId = serde_json::from_str("\"client_2\"").unwrap();
        assert_eq!(back.as_str(), "client_2");
    }
}
