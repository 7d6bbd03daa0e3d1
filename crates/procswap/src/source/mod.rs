//! Filesystem access for unit sources.
//!
//! The engine reads changed units asynchronously through the [`SourceFs`]
//! trait. [`TokioFs`] is the default implementation; tests substitute fakes
//! that fail on demand.

mod reader;

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::SystemTime;

pub use reader::{ResilientReader, RetrySchedule, WatchGate};

/// Boxed future type for [`SourceFs`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Asynchronous access to unit sources.
///
/// # Example
///
/// ```rust,ignore
/// use procswap::source::{BoxFuture, SourceFs};
///
/// struct Overlay { files: HashMap<PathBuf, String> }
///
/// impl SourceFs for Overlay {
///     fn read<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<String>> {
///         Box::pin(async move {
///             self.files.get(path).cloned().ok_or_else(|| io::ErrorKind::NotFound.into())
///         })
///     }
///
///     fn modified<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<SystemTime>> {
///         Box::pin(async move { Ok(SystemTime::UNIX_EPOCH) })
///     }
/// }
/// ```
pub trait SourceFs: Send + Sync {
    /// Reads the whole file as UTF-8.
    fn read<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<String>>;

    /// Returns the file's modification time.
    fn modified<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<SystemTime>>;

    /// Returns the modification time without suspending.
    ///
    /// Used for loads started by the host loader, which runs synchronously.
    /// Must report the same clock as [`modified`](Self::modified). The
    /// default reads the file's metadata from disk.
    fn modified_sync(&self, path: &Path) -> Option<SystemTime> {
        mtime(path)
    }
}

/// [`SourceFs`] backed by `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFs;

impl SourceFs for TokioFs {
    fn read<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<String>> {
        Box::pin(tokio::fs::read_to_string(path))
    }

    fn modified<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<SystemTime>> {
        Box::pin(async move { tokio::fs::metadata(path).await?.modified() })
    }
}

/// Removes a leading UTF-8 byte-order mark.
#[must_use]
pub fn strip_bom(content: &str) -> &str {
    content.strip_prefix('\u{feff}').unwrap_or(content)
}

/// Returns the modification time of a file, or `None` if it cannot be read.
pub fn mtime(path: &Path) -> Option<SystemTime> {
    path.metadata().and_then(|m| m.modified()).ok()
}

/// Resolves `path` against the current directory without touching the
/// filesystem.
pub(crate) fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
