//! Types for the FUSE mount lifecycle.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use fuse3::raw::MountHandle as Fuse3MountHandle;
use thiserror::Error;

/// Result type for mount operations.
pub type MountResult<T> = Result<T, MountError>;

/// Errors that can occur while mounting or unmounting.
#[derive(Debug, Error)]
pub enum MountError {
    /// I/O error from the FUSE session
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Mount operation failed
    #[error("mount failed: {0}")]
    MountFailed(String),
}

/// Handle to a mounted mirror filesystem.
///
/// The handle can be awaited - it resolves when the filesystem is
/// unmounted (e.g. via `fusermount -u`) - or unmounted explicitly with
/// [`MountHandle::unmount`].
pub struct MountHandle {
    inner: Fuse3MountHandle,
}

impl MountHandle {
    pub(crate) fn new(inner: Fuse3MountHandle) -> Self {
        Self { inner }
    }

    /// Unmount the filesystem.
    pub async fn unmount(self) -> io::Result<()> {
        self.inner.unmount().await
    }
}

/// Resolves when the filesystem is unmounted.
impl Future for MountHandle {
    type Output = io::Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_error_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "mountpoint missing");
        let err: MountError = io_err.into();
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_mount_error_failed() {
        let err = MountError::MountFailed("permission denied".to_string());
        assert!(err.to_string().contains("mount failed"));
        assert!(err.to_string().contains("permission denied"));
    }
}
