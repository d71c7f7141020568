//! FUSE protocol bridge.
//!
//! [`MirrorFs`] adapts the node layer to the fuse3 path-based protocol;
//! [`mount`] runs it as an async session on the tokio runtime. Each
//! inbound request is dispatched as its own task by fuse3, so node
//! operations run concurrently with whatever serialization the host
//! filesystem itself provides.

mod bridge;
mod mount;
mod types;

pub use bridge::MirrorFs;
pub use mount::mount;
pub use types::{MountError, MountHandle, MountResult};
