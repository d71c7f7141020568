//! Filesystem root: owns the mount and mirror roots and builds nodes.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::node::Node;

/// Shared, immutable filesystem state.
///
/// Created once at mount time and cloned (cheaply, via `Arc`) into every
/// node as a back-reference.
#[derive(Debug)]
pub(crate) struct FsInner {
    /// Location of the mount point.
    pub(crate) mount_root: PathBuf,
    /// Location operations are mirrored to.
    pub(crate) mirror_root: PathBuf,
}

/// The mirror filesystem.
///
/// Holds the mount root and the mirror root for the life of the mount and
/// is the single entry point the protocol bridge uses to obtain nodes.
/// Nodes themselves are transient: one is constructed per protocol request
/// that names a path, and none are cached or reused across requests.
#[derive(Debug, Clone)]
pub struct FileSystem {
    inner: Arc<FsInner>,
}

impl FileSystem {
    /// Create a filesystem mapping `mount_root` onto `mirror_root`.
    ///
    /// Paths are taken as given; nothing is resolved or validated here.
    pub fn new(mount_root: impl Into<PathBuf>, mirror_root: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(FsInner {
                mount_root: mount_root.into(),
                mirror_root: mirror_root.into(),
            }),
        }
    }

    /// The path under which mirrored operations are exposed.
    pub fn mount_root(&self) -> &Path {
        &self.inner.mount_root
    }

    /// The path all operations are actually applied to.
    pub fn mirror_root(&self) -> &Path {
        &self.inner.mirror_root
    }

    /// Node for the mount root. Never fails.
    pub fn root(&self) -> Node {
        self.make_node(self.inner.mount_root.clone())
    }

    /// Construct a node bound to this filesystem for the given path.
    ///
    /// Construction never validates existence; callers that require the
    /// mirror entry to exist (lookup, notably) check separately.
    pub fn make_node(&self, path: impl Into<PathBuf>) -> Node {
        Node::new(path.into(), self.clone())
    }

    /// Construct a node from a protocol path (`/`, `/a/b`, ...) as handed
    /// in by the FUSE bridge, anchored at the mount root.
    pub fn node_at(&self, protocol_path: &OsStr) -> Node {
        let path = Path::new(protocol_path);
        let rel = path.strip_prefix("/").unwrap_or(path);
        self.make_node(self.inner.mount_root.join(rel))
    }

    /// Whether `other` is the same filesystem instance.
    ///
    /// Rename refuses destinations bound to a foreign instance; this is
    /// the capability check backing that refusal.
    pub(crate) fn same_instance(&self, other: &FileSystem) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
