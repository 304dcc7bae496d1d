use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// A connected end of a named channel — implements Read + Write.
///
/// On Unix, this wraps a Unix domain socket stream.
/// On Windows, this wraps a named pipe handle.
pub struct PipeStream {
    inner: PipeStreamInner,
}

enum PipeStreamInner {
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
    #[cfg(windows)]
    Windows(crate::windows::PipeHandle),
}

impl Read for PipeStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            PipeStreamInner::Unix(stream) => stream.read(buf),
            #[cfg(windows)]
            PipeStreamInner::Windows(handle) => handle.read(buf),
        }
    }
}

impl Write for PipeStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            PipeStreamInner::Unix(stream) => stream.write(buf),
            #[cfg(windows)]
            PipeStreamInner::Windows(handle) => handle.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            PipeStreamInner::Unix(stream) => stream.flush(),
            #[cfg(windows)]
            PipeStreamInner::Windows(handle) => handle.flush(),
        }
    }
}

impl PipeStream {
    #[cfg(unix)]
    pub(crate) fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: PipeStreamInner::Unix(stream),
        }
    }

    #[cfg(windows)]
    pub(crate) fn from_windows(handle: crate::windows::PipeHandle) -> Self {
        Self {
            inner: PipeStreamInner::Windows(handle),
        }
    }

    #[cfg(windows)]
    pub(crate) fn windows_handle(&self) -> &crate::windows::PipeHandle {
        match &self.inner {
            PipeStreamInner::Windows(handle) => handle,
        }
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            PipeStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            #[cfg(windows)]
            PipeStreamInner::Windows(handle) => {
                handle.set_read_timeout(timeout);
                Ok(())
            }
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            PipeStreamInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            #[cfg(windows)]
            PipeStreamInner::Windows(handle) => {
                handle.set_write_timeout(timeout);
                Ok(())
            }
        }
    }

    /// Switch the stream into message-boundary-preserving read mode.
    ///
    /// Windows pipes need `PIPE_READMODE_MESSAGE` set on the client handle.
    /// Unix sockets carry no message mode; framing recovers the boundaries.
    pub fn set_message_mode(&mut self) -> Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            PipeStreamInner::Unix(_) => Ok(()),
            #[cfg(windows)]
            PipeStreamInner::Windows(handle) => handle.set_message_mode().map_err(Into::into),
        }
    }

    /// Shut down both directions without releasing the handle.
    pub fn shutdown(&self) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            PipeStreamInner::Unix(stream) => match stream.shutdown(std::net::Shutdown::Both) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
                Err(err) => Err(err.into()),
            },
            #[cfg(windows)]
            PipeStreamInner::Windows(_) => Ok(()),
        }
    }
}

impl std::fmt::Debug for PipeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            #[cfg(unix)]
            PipeStreamInner::Unix(_) => f.debug_struct("PipeStream").field("type", &"unix").finish(),
            #[cfg(windows)]
            PipeStreamInner::Windows(_) => f
                .debug_struct("PipeStream")
                .field("type", &"named-pipe")
                .finish(),
        }
    }
}
