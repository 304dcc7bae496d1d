use std::io::{ErrorKind, Write};
use std::net::Shutdown;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::PipeStream;

/// Server side of a named channel, backed by a Unix domain socket.
///
/// The socket file is the named resource. It survives peer sessions, so a
/// server can disconnect one peer and accept the next without re-binding.
/// The file is removed on drop if it still is the socket this server created.
///
/// A socket listener queues any number of clients, while a channel serves one
/// peer at a time. [`peer_slot_taken`](Self::peer_slot_taken) keeps the oldest
/// waiting connection for the next accept and shuts down the others.
pub struct PipeServer {
    listener: UnixListener,
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
    peer: Option<PipeStream>,
    queued: Option<UnixStream>,
}

impl PipeServer {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;

    /// Create the named channel at `path`.
    ///
    /// If a socket file already exists at `path` it is treated as stale and
    /// replaced. Any other kind of file is left alone and creation fails.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let create_err = |source: std::io::Error| TransportError::Create {
            path: path.clone(),
            source,
        };

        if path.exists() {
            let metadata = std::fs::symlink_metadata(&path).map_err(create_err)?;
            if metadata.file_type().is_socket() {
                debug!(?path, "removing stale socket");
                std::fs::remove_file(&path).map_err(create_err)?;
            } else {
                return Err(create_err(std::io::Error::new(
                    ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
        }

        let listener = UnixListener::bind(&path).map_err(create_err)?;
        listener.set_nonblocking(true).map_err(create_err)?;

        std::fs::set_permissions(
            &path,
            std::fs::Permissions::from_mode(Self::DEFAULT_SOCKET_MODE),
        )
        .map_err(create_err)?;
        let created_metadata = std::fs::symlink_metadata(&path).map_err(create_err)?;
        let created_inode = Some((created_metadata.dev(), created_metadata.ino()));

        info!(?path, "created channel");

        Ok(Self {
            listener,
            path,
            created_inode,
            peer: None,
            queued: None,
        })
    }

    /// Prepare to wait for the next peer.
    ///
    /// The returned [`PendingAccept`] owns a private duplicate of the listening
    /// descriptor, so the wait does not borrow this server. A connection kept
    /// by [`peer_slot_taken`](Self::peer_slot_taken) is handed over first.
    pub fn prepare_accept(&mut self) -> Result<PendingAccept> {
        let listener = self.listener.try_clone().map_err(TransportError::Accept)?;
        Ok(PendingAccept {
            listener,
            queued: self.queued.take(),
        })
    }

    /// Whether the single peer slot is held, by an attached peer or by a
    /// connection waiting to be accepted.
    ///
    /// Drains the listen backlog first. The oldest live connection is kept for
    /// the next accept; every other one is shut down, so its client sees the
    /// channel close instead of writing into a queue nobody reads.
    pub fn peer_slot_taken(&mut self) -> Result<bool> {
        if self.queued.as_ref().is_some_and(hung_up) {
            debug!(path = ?self.path, "queued peer hung up");
            self.queued = None;
        }
        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    if self.peer.is_none() && self.queued.is_none() && !hung_up(&stream) {
                        self.queued = Some(stream);
                    } else {
                        debug!(path = ?self.path, "refusing extra peer");
                        let _ = stream.shutdown(Shutdown::Both);
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Accept(err)),
            }
        }
        Ok(self.peer.is_some() || self.queued.is_some())
    }

    /// Install a peer produced by [`PendingAccept::wait`].
    pub fn attach(&mut self, accepted: Accepted) {
        self.peer = Some(PipeStream::from_unix(accepted.stream));
        debug!(path = ?self.path, "peer attached");
    }

    /// The connected peer stream, if any.
    pub fn peer_mut(&mut self) -> Option<&mut PipeStream> {
        self.peer.as_mut()
    }

    /// Whether a peer is currently attached.
    pub fn has_peer(&self) -> bool {
        self.peer.is_some()
    }

    /// Flush pending writes and forcibly disconnect the current peer.
    ///
    /// Returns `Ok(false)` when no peer was connected.
    pub fn disconnect_peer(&mut self) -> Result<bool> {
        let Some(mut peer) = self.peer.take() else {
            return Ok(false);
        };
        if let Err(err) = peer.flush() {
            debug!(path = ?self.path, error = %err, "flush before disconnect failed");
        }
        peer.shutdown()?;
        debug!(path = ?self.path, "peer disconnected");
        Ok(true)
    }

    /// The path this channel is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "unix-domain-socket"
    }
}

impl Drop for PipeServer {
    fn drop(&mut self) {
        if let Some(peer) = self.peer.take() {
            let _ = peer.shutdown();
        }
        if let Some(queued) = self.queued.take() {
            let _ = queued.shutdown(Shutdown::Both);
        }
        if let Some((expected_dev, expected_ino)) = self.created_inode {
            if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
                if metadata.file_type().is_socket()
                    && metadata.dev() == expected_dev
                    && metadata.ino() == expected_ino
                {
                    debug!(path = ?self.path, "cleaning up socket file");
                    let _ = std::fs::remove_file(&self.path);
                } else {
                    debug!(
                        path = ?self.path,
                        "socket path identity changed; skipping cleanup"
                    );
                }
            }
        }
    }
}

/// An in-progress wait for the next peer.
#[derive(Debug)]
pub struct PendingAccept {
    listener: UnixListener,
    queued: Option<UnixStream>,
}

impl PendingAccept {
    /// Block until a peer connects.
    ///
    /// A connection already waiting is returned at once. Otherwise `cancel`
    /// is checked every `poll_interval`; once it is raised the wait ends with
    /// [`TransportError::Cancelled`].
    pub fn wait(self, cancel: &AtomicBool, poll_interval: Duration) -> Result<Accepted> {
        if let Some(stream) = self.queued {
            stream
                .set_nonblocking(false)
                .map_err(TransportError::Accept)?;
            debug!("accepted queued connection");
            return Ok(Accepted { stream });
        }
        loop {
            if cancel.load(Ordering::SeqCst) {
                return Err(TransportError::Cancelled);
            }
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    // macOS hands out accepted sockets in the listener's mode.
                    stream
                        .set_nonblocking(false)
                        .map_err(TransportError::Accept)?;
                    debug!("accepted connection");
                    return Ok(Accepted { stream });
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(poll_interval);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Accept(err)),
            }
        }
    }
}

/// A peer connection accepted by [`PendingAccept::wait`].
#[derive(Debug)]
pub struct Accepted {
    stream: UnixStream,
}

/// Connect to a named channel (blocking).
pub fn connect(path: impl AsRef<Path>) -> Result<PipeStream> {
    let path = path.as_ref();
    let stream = UnixStream::connect(path).map_err(|source| classify_connect_error(path, source))?;
    debug!(?path, "connected to channel");
    Ok(PipeStream::from_unix(stream))
}

fn classify_connect_error(path: &Path, source: std::io::Error) -> TransportError {
    let path = path.to_path_buf();
    match source.raw_os_error() {
        // A leftover socket file with nobody listening is as good as missing.
        Some(libc::ENOENT) | Some(libc::ECONNREFUSED) => TransportError::NotFound { path, source },
        Some(code) if code == libc::EAGAIN || code == libc::EWOULDBLOCK => {
            TransportError::Busy { path, source }
        }
        _ => TransportError::Connect { path, source },
    }
}

pub(crate) fn is_busy_on_create(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::AddrInUse
}

/// The peer closed its end and sent nothing that is still unread.
fn hung_up(stream: &UnixStream) -> bool {
    let mut byte = 0u8;
    // SAFETY: the descriptor stays open while `stream` is borrowed and the
    // buffer is one writable byte. MSG_PEEK leaves queued data in place.
    let read = unsafe {
        libc::recv(
            stream.as_raw_fd(),
            (&mut byte as *mut u8).cast(),
            1,
            libc::MSG_PEEK | libc::MSG_DONTWAIT,
        )
    };
    read == 0
}
