//! File system abstraction for testability.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// Name of the file used to check that a directory accepts writes.
const WRITE_CHECK: &str = ".sytadel-write-check";

/// File system operations the orchestrator performs on the staging directory.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Creates all directories in the given path.
    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()>;

    /// Fails unless a file can be created inside `dir`.
    async fn check_writable(&self, dir: &Path) -> std::io::Result<()>;

    /// Removes a directory tree. A missing directory is not an error.
    async fn remove_dir_all(&self, path: &Path) -> std::io::Result<()>;
}

/// Default file system implementation using `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFileSystem;

impl TokioFileSystem {
    /// Creates a new `TokioFileSystem` instance.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystem for TokioFileSystem {
    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn check_writable(&self, dir: &Path) -> std::io::Result<()> {
        let marker = dir.join(WRITE_CHECK);
        tokio::fs::write(&marker, b"").await?;
        tokio::fs::remove_file(&marker).await
    }

    async fn remove_dir_all(&self, path: &Path) -> std::io::Result<()> {
        match tokio::fs::remove_dir_all(path).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// Removes a staging directory when the batch ends.
///
/// [`StagingDir::cleanup`] is the normal path; if the guard is dropped while
/// still armed (early return, panic) the directory is removed synchronously.
#[derive(Debug)]
pub struct StagingDir {
    path: PathBuf,
    armed: bool,
}

impl StagingDir {
    /// Arms a guard for `path`.
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the directory through `fs` and disarms the guard.
    pub async fn cleanup<F: FileSystem + ?Sized>(mut self, fs: &F) {
        self.armed = false;
        if let Err(e) = fs.remove_dir_all(&self.path).await {
            log::error!("Failed to remove {}: {e}", self.path.display());
        }
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if self.armed {
            match std::fs::remove_dir_all(&self.path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    log::error!("Failed to remove {}: {e}", self.path.display());
                }
                _ => {}
            }
        }
    }
}
