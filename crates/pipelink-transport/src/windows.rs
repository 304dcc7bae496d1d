use std::ffi::OsStr;
use std::io::{ErrorKind, Read, Write};
use std::os::windows::ffi::OsStrExt;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info};
use windows_sys::Win32::Foundation::{
    DuplicateHandle, GetLastError, DUPLICATE_SAME_ACCESS, ERROR_BROKEN_PIPE,
    ERROR_FILE_NOT_FOUND, ERROR_IO_PENDING, ERROR_MORE_DATA, ERROR_PIPE_BUSY,
    ERROR_PIPE_CONNECTED, ERROR_PIPE_NOT_CONNECTED, GENERIC_READ, GENERIC_WRITE, HANDLE,
    INVALID_HANDLE_VALUE, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, FlushFileBuffers, ReadFile, WriteFile, FILE_FLAG_OVERLAPPED, OPEN_EXISTING,
    PIPE_ACCESS_DUPLEX,
};
use windows_sys::Win32::System::Pipes::{
    ConnectNamedPipe, CreateNamedPipeW, DisconnectNamedPipe, SetNamedPipeHandleState,
    PIPE_READMODE_MESSAGE, PIPE_TYPE_MESSAGE, PIPE_WAIT,
};
use windows_sys::Win32::System::Threading::{CreateEventW, GetCurrentProcess, WaitForSingleObject};
use windows_sys::Win32::System::IO::{CancelIoEx, GetOverlappedResult, OVERLAPPED};

use crate::error::{Result, TransportError};
use crate::stream::PipeStream;

const PIPE_BUFFER_SIZE: u32 = 4096;
const INFINITE_MS: u32 = u32::MAX;

fn wide(path: &Path) -> Vec<u16> {
    OsStr::new(path)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

fn owned(handle: HANDLE) -> OwnedHandle {
    // SAFETY: callers pass a freshly created, valid handle that nothing else owns.
    unsafe { OwnedHandle::from_raw_handle(handle as _) }
}

fn raw(handle: &OwnedHandle) -> HANDLE {
    handle.as_raw_handle() as HANDLE
}

/// Manual-reset event used to wait on overlapped operations.
fn new_event() -> std::io::Result<OwnedHandle> {
    // SAFETY: null attributes and name are valid; the returned handle is checked.
    let event = unsafe { CreateEventW(std::ptr::null(), 1, 0, std::ptr::null()) };
    if event.is_null() {
        return Err(std::io::Error::last_os_error());
    }
    Ok(owned(event))
}

/// An owned named-pipe handle doing overlapped I/O.
///
/// Both ends are opened with `FILE_FLAG_OVERLAPPED`, so every read and write
/// is issued with an `OVERLAPPED` and waited on explicitly.
pub(crate) struct PipeHandle {
    handle: OwnedHandle,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl PipeHandle {
    fn new(handle: OwnedHandle) -> Self {
        Self {
            handle,
            read_timeout: None,
            write_timeout: None,
        }
    }

    fn raw(&self) -> HANDLE {
        raw(&self.handle)
    }

    pub(crate) fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    pub(crate) fn set_write_timeout(&mut self, timeout: Option<Duration>) {
        self.write_timeout = timeout;
    }

    pub(crate) fn set_message_mode(&self) -> std::io::Result<()> {
        let mode = PIPE_READMODE_MESSAGE;
        // SAFETY: `mode` outlives the call; null optional pointers are allowed.
        let ok = unsafe {
            SetNamedPipeHandleState(self.raw(), &mode, std::ptr::null(), std::ptr::null())
        };
        if ok == 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    fn overlapped_io(
        &self,
        timeout: Option<Duration>,
        start: impl FnOnce(HANDLE, *mut OVERLAPPED) -> i32,
    ) -> std::io::Result<usize> {
        let event = new_event()?;
        // SAFETY: OVERLAPPED is plain data; all-zero is its documented initial state.
        let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
        overlapped.hEvent = raw(&event);

        if start(self.raw(), &mut overlapped) == 0 {
            // SAFETY: reads the calling thread's last-error value.
            let code = unsafe { GetLastError() };
            if code != ERROR_IO_PENDING {
                return Err(std::io::Error::from_raw_os_error(code as i32));
            }
            let wait_ms = timeout
                .map(|t| t.as_millis().min(u128::from(INFINITE_MS - 1)) as u32)
                .unwrap_or(INFINITE_MS);
            // SAFETY: the event handle is valid for the duration of the wait.
            if unsafe { WaitForSingleObject(raw(&event), wait_ms) } == WAIT_TIMEOUT {
                // SAFETY: cancels only this operation; we still wait for it below
                // so `overlapped` is not released while the kernel uses it.
                unsafe { CancelIoEx(self.raw(), &overlapped) };
                let mut ignored = 0u32;
                unsafe { GetOverlappedResult(self.raw(), &overlapped, &mut ignored, 1) };
                return Err(std::io::Error::from(ErrorKind::TimedOut));
            }
        }

        let mut transferred = 0u32;
        // SAFETY: `overlapped` belongs to the operation started above.
        let ok = unsafe { GetOverlappedResult(self.raw(), &overlapped, &mut transferred, 1) };
        if ok == 0 {
            let err = std::io::Error::last_os_error();
            return match err.raw_os_error().map(|c| c as u32) {
                // A partial message still delivered bytes into the buffer.
                Some(ERROR_MORE_DATA) => Ok(transferred as usize),
                Some(ERROR_BROKEN_PIPE) | Some(ERROR_PIPE_NOT_CONNECTED) => Ok(0),
                _ => Err(err),
            };
        }
        Ok(transferred as usize)
    }
}

impl Read for PipeHandle {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let len = buf.len().min(u32::MAX as usize) as u32;
        let ptr = buf.as_mut_ptr();
        self.overlapped_io(self.read_timeout, |handle, overlapped| {
            // SAFETY: `ptr` is valid for `len` bytes until the operation completes.
            unsafe { ReadFile(handle, ptr, len, std::ptr::null_mut(), overlapped) }
        })
    }
}

impl Write for PipeHandle {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let len = buf.len().min(u32::MAX as usize) as u32;
        let ptr = buf.as_ptr();
        self.overlapped_io(self.write_timeout, |handle, overlapped| {
            // SAFETY: `ptr` is valid for `len` bytes until the operation completes.
            unsafe { WriteFile(handle, ptr, len, std::ptr::null_mut(), overlapped) }
        })
    }

    fn flush(&mut self) -> std::io::Result<()> {
        // SAFETY: the handle is owned and open.
        if unsafe { FlushFileBuffers(self.raw()) } == 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error().map(|c| c as u32) == Some(ERROR_PIPE_NOT_CONNECTED) {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }
}

/// Server side of a named channel, backed by a single-instance named pipe.
pub struct PipeServer {
    stream: PipeStream,
    path: PathBuf,
    connected: bool,
}

impl PipeServer {
    /// Create the named pipe instance at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let name = wide(&path);

        // SAFETY: `name` is NUL-terminated and outlives the call.
        let handle = unsafe {
            CreateNamedPipeW(
                name.as_ptr(),
                PIPE_ACCESS_DUPLEX | FILE_FLAG_OVERLAPPED,
                PIPE_TYPE_MESSAGE | PIPE_READMODE_MESSAGE | PIPE_WAIT,
                1,
                PIPE_BUFFER_SIZE,
                PIPE_BUFFER_SIZE,
                0,
                std::ptr::null(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(TransportError::Create {
                path,
                source: std::io::Error::last_os_error(),
            });
        }

        info!(?path, "created channel");
        Ok(Self {
            stream: PipeStream::from_windows(PipeHandle::new(owned(handle))),
            path,
            connected: false,
        })
    }

    fn raw(&self) -> HANDLE {
        self.stream.windows_handle().raw()
    }

    /// Prepare to wait for the next peer on a private duplicate of the pipe handle.
    pub fn prepare_accept(&mut self) -> Result<PendingAccept> {
        let mut duplicate: HANDLE = std::ptr::null_mut();
        // SAFETY: source handle is open; `duplicate` receives a new handle we own.
        let ok = unsafe {
            DuplicateHandle(
                GetCurrentProcess(),
                self.raw(),
                GetCurrentProcess(),
                &mut duplicate,
                0,
                0,
                DUPLICATE_SAME_ACCESS,
            )
        };
        if ok == 0 {
            return Err(TransportError::Accept(std::io::Error::last_os_error()));
        }
        Ok(PendingAccept {
            handle: owned(duplicate),
        })
    }

    /// Record a peer produced by [`PendingAccept::wait`].
    pub fn attach(&mut self, _accepted: Accepted) {
        self.connected = true;
        debug!(path = ?self.path, "peer attached");
    }

    /// The connected peer stream, if any.
    pub fn peer_mut(&mut self) -> Option<&mut PipeStream> {
        if self.connected {
            Some(&mut self.stream)
        } else {
            None
        }
    }

    /// Whether a peer is currently attached.
    pub fn has_peer(&self) -> bool {
        self.connected
    }

    /// Whether the single peer slot is held.
    ///
    /// With one pipe instance the OS itself answers a second client with
    /// `ERROR_PIPE_BUSY`, so only an attached peer is reported here.
    pub fn peer_slot_taken(&mut self) -> Result<bool> {
        Ok(self.connected)
    }

    /// Flush pending writes and forcibly disconnect the current peer.
    ///
    /// Returns `Ok(false)` when no peer was connected.
    pub fn disconnect_peer(&mut self) -> Result<bool> {
        let was_connected = std::mem::replace(&mut self.connected, false);
        if was_connected {
            if let Err(err) = self.stream.flush() {
                debug!(path = ?self.path, error = %err, "flush before disconnect failed");
            }
        }
        // SAFETY: the pipe handle is owned and open.
        if unsafe { DisconnectNamedPipe(self.raw()) } == 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error().map(|c| c as u32) == Some(ERROR_PIPE_NOT_CONNECTED) {
                return Ok(false);
            }
            return Err(TransportError::Io(err));
        }
        debug!(path = ?self.path, "peer disconnected");
        Ok(was_connected)
    }

    /// The pipe path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "named-pipe"
    }
}

impl Drop for PipeServer {
    fn drop(&mut self) {
        // SAFETY: the pipe handle is owned and open until `stream` drops.
        unsafe {
            CancelIoEx(self.raw(), std::ptr::null());
            if self.connected {
                DisconnectNamedPipe(self.raw());
            }
        }
    }
}

/// An in-progress wait for the next peer.
#[derive(Debug)]
pub struct PendingAccept {
    handle: OwnedHandle,
}

impl PendingAccept {
    /// Block until a peer connects.
    ///
    /// `cancel` is checked every `poll_interval`; once it is raised the pending
    /// `ConnectNamedPipe` is cancelled and the wait ends with
    /// [`TransportError::Cancelled`].
    pub fn wait(self, cancel: &AtomicBool, poll_interval: Duration) -> Result<Accepted> {
        let handle = raw(&self.handle);
        let event = new_event().map_err(TransportError::Accept)?;
        // SAFETY: OVERLAPPED is plain data; all-zero is its documented initial state.
        let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
        overlapped.hEvent = raw(&event);

        // SAFETY: `overlapped` stays alive and unmoved until the operation completes
        // or is cancelled and drained below.
        if unsafe { ConnectNamedPipe(handle, &mut overlapped) } != 0 {
            return Ok(Accepted { _private: () });
        }
        // SAFETY: reads the calling thread's last-error value.
        match unsafe { GetLastError() } {
            ERROR_PIPE_CONNECTED => return Ok(Accepted { _private: () }),
            ERROR_IO_PENDING => {}
            code => {
                return Err(TransportError::Accept(std::io::Error::from_raw_os_error(
                    code as i32,
                )))
            }
        }

        let poll_ms = poll_interval.as_millis().clamp(1, u128::from(u32::MAX - 1)) as u32;
        loop {
            // SAFETY: the event handle is valid for the duration of the wait.
            let wait = unsafe { WaitForSingleObject(raw(&event), poll_ms) };
            if wait == WAIT_OBJECT_0 {
                let mut ignored = 0u32;
                // SAFETY: `overlapped` belongs to the ConnectNamedPipe above.
                let ok = unsafe { GetOverlappedResult(handle, &overlapped, &mut ignored, 0) };
                if ok == 0 {
                    return Err(TransportError::Accept(std::io::Error::last_os_error()));
                }
                debug!("accepted connection");
                return Ok(Accepted { _private: () });
            }
            if wait != WAIT_TIMEOUT {
                return Err(TransportError::Accept(std::io::Error::last_os_error()));
            }
            if cancel.load(Ordering::SeqCst) {
                let mut ignored = 0u32;
                // SAFETY: cancel, then drain so the kernel is done with `overlapped`.
                unsafe {
                    CancelIoEx(handle, &overlapped);
                    GetOverlappedResult(handle, &overlapped, &mut ignored, 1);
                }
                return Err(TransportError::Cancelled);
            }
        }
    }
}

/// A peer connection accepted by [`PendingAccept::wait`].
#[derive(Debug)]
pub struct Accepted {
    _private: (),
}

/// Connect to a named pipe (blocking).
pub fn connect(path: impl AsRef<Path>) -> Result<PipeStream> {
    let path = path.as_ref();
    let name = wide(path);

    // SAFETY: `name` is NUL-terminated and outlives the call.
    let handle = unsafe {
        CreateFileW(
            name.as_ptr(),
            GENERIC_READ | GENERIC_WRITE,
            0,
            std::ptr::null(),
            OPEN_EXISTING,
            FILE_FLAG_OVERLAPPED,
            std::ptr::null_mut(),
        )
    };
    if handle == INVALID_HANDLE_VALUE {
        let source = std::io::Error::last_os_error();
        let path = path.to_path_buf();
        return Err(match source.raw_os_error().map(|c| c as u32) {
            Some(ERROR_FILE_NOT_FOUND) => TransportError::NotFound { path, source },
            Some(ERROR_PIPE_BUSY) => TransportError::Busy { path, source },
            _ => TransportError::Connect { path, source },
        });
    }

    debug!(?path, "connected to channel");
    Ok(PipeStream::from_windows(PipeHandle::new(owned(handle))))
}

pub(crate) fn is_busy_on_create(err: &std::io::Error) -> bool {
    err.raw_os_error().map(|c| c as u32) == Some(ERROR_PIPE_BUSY)
}
