//! Mapping of logical channel names onto the platform pipe namespace.
//!
//! Both ends of a channel must resolve the same logical name through the same
//! namespace, otherwise they will never meet.

use std::path::{Path, PathBuf};

use crate::error::{Result, TransportError};

/// Directory name under the system temp dir used as the default Unix namespace.
#[cfg(unix)]
pub const DEFAULT_NAMESPACE_DIR: &str = "pipelink";

/// Well-known prefix of the Windows named-pipe namespace.
#[cfg(windows)]
pub const PIPE_PREFIX: &str = r"\\.\pipe";

/// Where channel names live on this platform.
///
/// On Unix a channel `alpha` becomes `<root>/alpha.sock`. On Windows it becomes
/// `\\.\pipe\alpha` and the root is fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeNamespace {
    root: PathBuf,
}

impl PipeNamespace {
    /// Maximum channel path length.
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    pub const MAX_PATH_LEN: usize = 108;
    #[cfg(all(unix, not(target_os = "linux")))]
    pub const MAX_PATH_LEN: usize = 104;
    /// Windows pipe names are limited to 256 characters.
    #[cfg(windows)]
    pub const MAX_PATH_LEN: usize = 256;

    /// Use an explicit root directory for channel sockets.
    ///
    /// Ignored on Windows, where the pipe namespace is fixed by the OS.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        #[cfg(windows)]
        {
            let _: PathBuf = root.into();
            Self::default()
        }
        #[cfg(not(windows))]
        {
            Self { root: root.into() }
        }
    }

    /// The namespace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a logical channel name to its platform path.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;

        #[cfg(windows)]
        let path = self.root.join(name);
        #[cfg(not(windows))]
        let path = self.root.join(format!("{name}.sock"));

        let len = path.as_os_str().len();
        if len >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len,
                max: Self::MAX_PATH_LEN,
            });
        }
        Ok(path)
    }

    /// Create the namespace root if it does not exist yet (Unix only).
    pub fn ensure_root(&self) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;

            if !self.root.is_dir() {
                std::fs::DirBuilder::new()
                    .recursive(true)
                    .mode(0o700)
                    .create(&self.root)
                    .map_err(|source| TransportError::Create {
                        path: self.root.clone(),
                        source,
                    })?;
                tracing::debug!(root = ?self.root, "created pipe namespace directory");
            }
        }
        Ok(())
    }
}

impl Default for PipeNamespace {
    fn default() -> Self {
        #[cfg(windows)]
        let root = PathBuf::from(PIPE_PREFIX);
        #[cfg(not(windows))]
        let root = std::env::temp_dir().join(DEFAULT_NAMESPACE_DIR);

        Self { root }
    }
}

fn validate_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        Some("name must not be empty")
    } else if name.contains(['/', '\\']) {
        Some("name must not contain path separators")
    } else if name.contains('\0') {
        Some("name must not contain NUL")
    } else if name == "." || name == ".." {
        Some("name must not be a relative path component")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(TransportError::InvalidName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}
