//! Mounting the mirror filesystem.

use std::path::Path;

use fuse3::path::Session;
use fuse3::MountOptions;
use tracing::info;

use super::bridge::MirrorFs;
use super::types::{MountHandle, MountResult};
use crate::fs::FileSystem;

/// Mount `fs` at `mountpoint` and return a handle that resolves when
/// the filesystem is unmounted.
///
/// The session is mounted unprivileged (via `fusermount`), so no root
/// is required. Mount failures surface immediately; once mounted, a
/// failed operation never aborts the mount.
pub async fn mount(fs: FileSystem, mountpoint: impl AsRef<Path>) -> MountResult<MountHandle> {
    let mountpoint = mountpoint.as_ref();
    info!(
        mount = %fs.mount_root().display(),
        mirror = %fs.mirror_root().display(),
        "mounting mirror filesystem"
    );

    let uid = unsafe { libc::getuid() };
    let gid = unsafe { libc::getgid() };

    let mut options = MountOptions::default();
    options.fs_name("mirrorfs").uid(uid).gid(gid);

    let handle = Session::new(options)
        .mount_with_unprivileged(MirrorFs::new(fs), mountpoint)
        .await?;

    info!(mountpoint = %mountpoint.display(), "mounted");
    Ok(MountHandle::new(handle))
}
