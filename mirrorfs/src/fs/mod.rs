//! Path-translation and node layer.
//!
//! [`FileSystem`] owns the mount and mirror roots; [`Node`] turns each
//! protocol operation into the corresponding host filesystem calls on
//! the mirror tree. The FUSE wire protocol lives one level up, in
//! [`crate::fuse`].

mod filesystem;
mod node;

pub use filesystem::FileSystem;
pub use node::{DirEntry, EntryKind, Node, NodeAttr, SetattrRequest};
