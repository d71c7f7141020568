//! Error taxonomy for mirror filesystem operations.
//!
//! Host filesystem failures are classified once, centrally, into a small
//! closed set of kinds. The FUSE bridge maps each kind to a protocol errno
//! at the boundary; nothing else in the crate constructs errno values.

use std::io;

use fuse3::Errno;
use thiserror::Error;

/// Result type for node and filesystem operations.
pub type FsResult<T> = Result<T, FsError>;

/// Errors surfaced by the node layer.
#[derive(Debug, Error)]
pub enum FsError {
    /// The mirror entry does not exist.
    #[error("entry not found")]
    NotFound,

    /// Creation required absence, but the mirror entry is present.
    #[error("entry already exists")]
    AlreadyExists,

    /// The host filesystem denied access.
    #[error("permission denied")]
    PermissionDenied,

    /// A cross-implementation argument did not satisfy the expected node
    /// capability (e.g. a rename destination bound to a different
    /// filesystem instance). This is a programmer-visible failure, never
    /// silently swallowed.
    #[error("node belongs to a different filesystem instance")]
    TypeMismatch,

    /// Any other host filesystem failure.
    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for FsError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => FsError::NotFound,
            io::ErrorKind::AlreadyExists => FsError::AlreadyExists,
            io::ErrorKind::PermissionDenied => FsError::PermissionDenied,
            _ => FsError::Io(err),
        }
    }
}

impl From<nix::errno::Errno> for FsError {
    fn from(err: nix::errno::Errno) -> Self {
        io::Error::from(err).into()
    }
}

impl From<FsError> for Errno {
    fn from(err: FsError) -> Self {
        match err {
            FsError::NotFound => Errno::from(libc::ENOENT),
            FsError::AlreadyExists => Errno::from(libc::EEXIST),
            FsError::PermissionDenied => Errno::from(libc::EPERM),
            // Only rename across filesystem instances can observe this;
            // EXDEV is what the kernel reports for that case.
            FsError::TypeMismatch => Errno::from(libc::EXDEV),
            FsError::Io(io_err) => io_err
                .raw_os_error()
                .map(Errno::from)
                .unwrap_or_else(|| Errno::from(libc::EIO)),
        }
    }
}
