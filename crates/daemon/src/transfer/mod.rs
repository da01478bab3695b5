//! Transfer backends: the capability surface between the core and storage.
//!
//! The scheduler, converter, and committer only ever talk to
//! [`TransferBackend`]; whether files live on a local filesystem or behind an
//! SFTP channel is decided once at startup.

pub mod local;
pub mod sftp;

pub use local::LocalBackend;
pub use sftp::{SftpBackend, SftpSettings};

use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

/// Error type for transfer operations
#[derive(Debug, Error)]
pub enum TransferError {
    /// Local IO failure
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// SFTP operation failure
    #[error("SFTP error on {path}: {source}")]
    Sftp {
        path: PathBuf,
        #[source]
        source: ssh2::Error,
    },

    /// Connecting or authenticating to the remote host failed
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Path escapes every configured root; rejected before any I/O
    #[error("Path {0} is outside the configured roots")]
    OutsideRoots(PathBuf),

    /// Source exceeds the configured transfer size limit
    #[error("File {path} is {size} bytes, over the {limit} byte limit")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },

    /// Transfer deadline exceeded
    #[error("Transfer of {0} timed out")]
    Timeout(PathBuf),
}

/// Metadata for one regular file visible through a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

/// Capability surface over one storage location.
///
/// All operations block the calling thread; workers run them on the blocking
/// pool so only the owning job waits. Implementations must finalize `store`
/// atomically (write a temp name, then rename), so a destination path is
/// never observable partially written.
pub trait TransferBackend: Send + Sync {
    /// Recursively list regular files under `root`.
    ///
    /// Hidden entries (leading `.`) are skipped. Symlinks are followed only
    /// when their resolved target stays inside `root`.
    fn list_root(&self, root: &Path) -> Result<Vec<FileMeta>, TransferError>;

    fn stat(&self, path: &Path) -> Result<FileMeta, TransferError>;

    fn exists(&self, path: &Path) -> Result<bool, TransferError>;

    /// Copy `source` into the local staging path.
    fn fetch(&self, source: &Path, staging: &Path) -> Result<(), TransferError>;

    /// Publish a staged file at `dest` atomically.
    fn store(&self, staging: &Path, dest: &Path) -> Result<(), TransferError>;

    fn remove(&self, path: &Path) -> Result<(), TransferError>;

    fn set_mtime(&self, path: &Path, modified: SystemTime) -> Result<(), TransferError>;
}

/// Check that `path` stays inside one of the given roots.
///
/// Purely lexical: any `..` component is rejected outright (before
/// normalization could fold it away), relative paths are rejected, and the
/// cleaned path must be equal to or below a cleaned root.
pub fn path_within_roots(path: &Path, roots: &[PathBuf]) -> bool {
    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return false;
    }
    let cleaned = path_clean::clean(path);
    if !cleaned.is_absolute() {
        return false;
    }
    roots.iter().any(|root| {
        let root = path_clean::clean(root);
        cleaned == root || cleaned.starts_with(&root)
    })
}

/// Temporary name used while uploading: `<dest>.tmp` in the same directory,
/// so the final rename stays on one filesystem.
pub fn temp_upload_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
