//! MirrorFS - a passthrough FUSE filesystem.
//!
//! Every read, write, attribute, and directory-structure operation
//! performed under the mount root is mirrored onto the equivalent path
//! under a separate mirror root, so the mirror directory is an
//! always-consistent shadow of whatever the mount presents.
//!
//! # Architecture
//!
//! ```text
//! kernel ──► fuse3 session ──► MirrorFs (bridge) ──► Node ──► mirror tree
//!                                                     │
//!                                              FileSystem (roots)
//! ```
//!
//! The node layer ([`fs`]) is the core: it maps mount paths to mirror
//! paths, owns open descriptors, and translates host errors into the
//! closed [`FsError`] taxonomy. The [`fuse`] module adapts it to the
//! fuse3 wire protocol. There is no caching anywhere: every attribute
//! request re-reads the mirror's live state.

pub mod error;
pub mod fs;
pub mod fuse;
pub mod telemetry;

pub use error::{FsError, FsResult};
pub use fs::{DirEntry, EntryKind, FileSystem, Node, NodeAttr, SetattrRequest};
pub use fuse::{mount, MirrorFs, MountError, MountHandle};

/// Crate version, as reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
