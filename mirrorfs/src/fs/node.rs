//! Nodes: one transient object per path in the mount namespace.
//!
//! A node is constructed fresh for every protocol request that names a
//! path (lookup, create, mkdir, or root access) and dropped when the
//! bridge releases it. Its path identity is immutable; the only mutable
//! state is the open-handle slot, which no other node instance can
//! observe. Attributes are never cached: every [`Node::attr`] call
//! re-reads the mirror's live state.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use filetime::FileTime;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::filesystem::FileSystem;
use crate::error::{FsError, FsResult};

/// Kind of a directory entry, reduced to the closed set this layer
/// understands. Anything the host does not flag as a directory is
/// reported as a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One immediate entry of a mirror directory.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: std::ffi::OsString,
    pub kind: EntryKind,
    /// Host inode number, passed through as a hint only.
    pub ino: u64,
}

/// Live attributes of a mirror entry.
///
/// Populated directly from the host stat result, except `atime`, which
/// is the wall-clock time of the call (the host access time is not
/// propagated).
#[derive(Debug, Clone, Copy)]
pub struct NodeAttr {
    pub ino: u64,
    pub size: u64,
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub kind: EntryKind,
    /// Permission bits (`mode & 0o7777`).
    pub perm: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub blksize: u32,
}

/// Attribute changes requested by the protocol, each field independent.
///
/// Fields this layer does not model (`ctime`, `lock_owner`, `fh`) are
/// accepted without effect and only logged.
#[derive(Debug, Default, Clone)]
pub struct SetattrRequest {
    pub size: Option<u64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub mode: Option<u32>,
    pub atime: Option<SystemTime>,
    /// Set the access time to "now", resolved at apply time.
    pub atime_now: bool,
    pub mtime: Option<SystemTime>,
    /// Set the modification time to "now", resolved at apply time.
    pub mtime_now: bool,
    pub ctime: Option<SystemTime>,
    pub lock_owner: Option<u64>,
    pub fh: Option<u64>,
}

impl SetattrRequest {
    fn touches_times(&self) -> bool {
        self.atime.is_some() || self.atime_now || self.mtime.is_some() || self.mtime_now
    }
}

/// Exclusively owned open-file state. Created lazily on the first read
/// or write (or eagerly by create), destroyed only on release.
#[derive(Debug)]
struct OpenHandle {
    file: File,
}

impl OpenHandle {
    /// Lazy transition to Open: stat the live mirror entry, then open it
    /// read-write.
    ///
    /// Note the original open flags are not replayed here; in particular
    /// append-mode propagation through this path is unspecified.
    fn open_live(mirror: &Path) -> FsResult<Self> {
        std::fs::metadata(mirror)?;
        let file = OpenOptions::new().read(true).write(true).open(mirror)?;
        Ok(Self { file })
    }
}

/// One path in the mount namespace.
///
/// The handle slot is a two-state machine: Closed (no descriptor) or
/// Open (descriptor bound). The transition to Open happens on the first
/// read, write, or create, and is reversed only by [`Node::release`].
/// Fsync and flush never reopen.
#[derive(Debug)]
pub struct Node {
    /// Absolute path within the mount namespace.
    path: PathBuf,
    /// Back-reference to the owning filesystem.
    fs: FileSystem,
    /// Open-handle slot, owned by this instance alone.
    handle: Mutex<Option<OpenHandle>>,
}

impl Node {
    pub(crate) fn new(path: PathBuf, fs: FileSystem) -> Self {
        Self {
            path,
            fs,
            handle: Mutex::new(None),
        }
    }

    /// Path of this node within the mount namespace.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The concrete host location operations on this node touch:
    /// `mirror_root + relative(path, mount_root)`.
    ///
    /// Pure and total; every access to the mirror tree goes through
    /// here. A path outside the mount root (which the invariants rule
    /// out) degenerates to the mirror root itself.
    pub fn mirror_path(&self) -> PathBuf {
        let rel = self
            .path
            .strip_prefix(self.fs.mount_root())
            .unwrap_or_else(|_| Path::new(""));
        self.fs.mirror_root().join(rel)
    }

    // ------------------------------------------------------------------
    // Attribute operations
    // ------------------------------------------------------------------

    /// Live attributes of the mirror entry. Never cached.
    pub async fn attr(&self) -> FsResult<NodeAttr> {
        let mirror = self.mirror_path();
        let meta = tokio::fs::metadata(&mirror).await?;
        let now = SystemTime::now();
        Ok(NodeAttr {
            ino: meta.ino(),
            size: meta.len(),
            blocks: meta.blocks(),
            atime: now,
            mtime: meta.modified()?,
            ctime: system_time(meta.ctime(), meta.ctime_nsec()),
            kind: entry_kind(meta.is_dir()),
            perm: meta.mode() & 0o7777,
            nlink: meta.nlink() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            rdev: meta.rdev() as u32,
            blksize: meta.blksize() as u32,
        })
    }

    /// Apply whichever attribute changes are present in `req`, then
    /// return the mirror's post-mutation live attributes.
    ///
    /// Truncate and chown failures propagate; chmod and chtimes are
    /// best-effort.
    pub async fn setattr(&self, req: SetattrRequest) -> FsResult<NodeAttr> {
        let mirror = self.mirror_path();
        let meta = tokio::fs::metadata(&mirror).await?;

        if let Some(size) = req.size {
            if meta.is_dir() {
                warn!(path = %mirror.display(), "ignoring truncate on a directory");
            } else {
                let file = tokio::fs::OpenOptions::new()
                    .write(true)
                    .open(&mirror)
                    .await?;
                file.set_len(size).await?;
            }
        }

        if req.uid.is_some() || req.gid.is_some() {
            let uid = req.uid.unwrap_or_else(|| meta.uid());
            let gid = req.gid.unwrap_or_else(|| meta.gid());
            std::os::unix::fs::chown(&mirror, Some(uid), Some(gid))?;
        }

        if let Some(mode) = req.mode {
            let perms = std::fs::Permissions::from_mode(mode & 0o7777);
            if let Err(err) = tokio::fs::set_permissions(&mirror, perms).await {
                debug!(path = %mirror.display(), %err, "chmod failed, continuing");
            }
        }

        if req.touches_times() {
            let atime = if req.atime_now {
                SystemTime::now()
            } else if let Some(t) = req.atime {
                t
            } else {
                meta.accessed()?
            };
            let mtime = if req.mtime_now {
                SystemTime::now()
            } else if let Some(t) = req.mtime {
                t
            } else {
                meta.modified()?
            };
            if let Err(err) = filetime::set_file_times(
                &mirror,
                FileTime::from_system_time(atime),
                FileTime::from_system_time(mtime),
            ) {
                debug!(path = %mirror.display(), %err, "chtimes failed, continuing");
            }
        }

        if req.ctime.is_some() {
            debug!(path = %mirror.display(), "ignoring ctime change request");
        }
        if req.lock_owner.is_some() {
            debug!(path = %mirror.display(), "ignoring lock owner change request");
        }
        if req.fh.is_some() {
            debug!(path = %mirror.display(), "ignoring handle change request");
        }

        // The response must reflect the post-mutation live state.
        self.attr().await
    }

    // ------------------------------------------------------------------
    // Directory operations
    // ------------------------------------------------------------------

    /// Child node for `name`, verified to exist in the mirror tree.
    ///
    /// Construction alone never fails, so existence is checked here.
    pub async fn lookup(&self, name: impl AsRef<Path>) -> FsResult<Node> {
        let child = self.fs.make_node(self.path.join(name.as_ref()));
        tokio::fs::metadata(child.mirror_path()).await?;
        Ok(child)
    }

    /// Immediate entries of the mirror directory.
    pub async fn read_dir_all(&self) -> FsResult<Vec<DirEntry>> {
        let mirror = self.mirror_path();
        let mut reader = tokio::fs::read_dir(&mirror).await?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let file_type = entry.file_type().await?;
            entries.push(DirEntry {
                name: entry.file_name(),
                kind: entry_kind(file_type.is_dir()),
                ino: entry.ino(),
            });
        }
        Ok(entries)
    }

    /// Create the mirror directory `name` with `mode`, then chown it to
    /// the requesting identity (best-effort).
    pub async fn mkdir(&self, name: impl AsRef<Path>, mode: u32, uid: u32, gid: u32) -> FsResult<Node> {
        let child = self.fs.make_node(self.path.join(name.as_ref()));
        let mirror = child.mirror_path();

        let mut builder = tokio::fs::DirBuilder::new();
        builder.mode(mode & 0o7777);
        builder.create(&mirror).await?;

        if let Err(err) = std::os::unix::fs::chown(&mirror, Some(uid), Some(gid)) {
            warn!(path = %mirror.display(), %err, "chown after mkdir failed, continuing");
        }
        Ok(child)
    }

    /// Remove the named entry (file or empty directory) from the mirror
    /// directory.
    pub async fn remove(&self, name: impl AsRef<Path>) -> FsResult<()> {
        let mirror = self.mirror_path().join(name.as_ref());
        let meta = tokio::fs::metadata(&mirror).await?;
        if meta.is_dir() {
            tokio::fs::remove_dir(&mirror).await?;
        } else {
            tokio::fs::remove_file(&mirror).await?;
        }
        Ok(())
    }

    /// Move `old_name` under this node to `new_name` under `dest` using
    /// the host's atomic rename (overwrite-if-exists).
    ///
    /// Fails with [`FsError::TypeMismatch`] when `dest` is bound to a
    /// different filesystem instance.
    pub async fn rename(
        &self,
        old_name: impl AsRef<Path>,
        dest: &Node,
        new_name: impl AsRef<Path>,
    ) -> FsResult<()> {
        if !self.fs.same_instance(&dest.fs) {
            return Err(FsError::TypeMismatch);
        }
        let from = self.mirror_path().join(old_name.as_ref());
        let to = dest.mirror_path().join(new_name.as_ref());
        tokio::fs::rename(&from, &to).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // File operations and handle lifecycle
    // ------------------------------------------------------------------

    /// Open (creating) the mirror file `name` with the protocol flags
    /// and mode. The descriptor is bound to the returned node, which
    /// doubles as the open handle.
    ///
    /// The creation flags ride through as raw custom flags rather than
    /// the builder's `create`, which would reject a read-only access
    /// mode the host open call accepts.
    pub fn create(&self, name: impl AsRef<Path>, flags: u32, mode: u32) -> FsResult<Node> {
        let child = self.fs.make_node(self.path.join(name.as_ref()));
        let mirror = child.mirror_path();

        let mut opts = open_options(flags);
        opts.mode(mode & 0o7777)
            .custom_flags((flags as i32 & !libc::O_ACCMODE) | libc::O_CREAT);
        let file = opts.open(&mirror)?;

        *child.handle.lock() = Some(OpenHandle { file });
        Ok(child)
    }

    /// Read up to `size` bytes at `offset`. Returns fewer bytes at end
    /// of file; that is not an error. Transitions Closed -> Open.
    pub fn read(&self, offset: u64, size: u32) -> FsResult<Vec<u8>> {
        self.with_file(|file| {
            let mut buf = vec![0u8; size as usize];
            let mut filled = 0;
            while filled < buf.len() {
                match file.read_at(&mut buf[filled..], offset + filled as u64) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => return Err(err),
                }
            }
            buf.truncate(filled);
            Ok(buf)
        })
    }

    /// Write `data` at `offset`, returning the count written.
    /// Transitions Closed -> Open.
    pub fn write(&self, offset: u64, data: &[u8]) -> FsResult<usize> {
        self.with_file(|file| {
            file.write_all_at(data, offset)?;
            Ok(data.len())
        })
    }

    /// Flush the descriptor's buffers to stable storage. No-op when the
    /// handle is Closed; the slot is never reopened here.
    pub fn fsync(&self) -> FsResult<()> {
        let guard = self.handle.lock();
        if let Some(handle) = guard.as_ref() {
            handle.file.sync_all().map_err(FsError::from)?;
        }
        Ok(())
    }

    /// Always a no-op: this layer holds no write buffer above the host
    /// descriptor.
    pub fn flush(&self) -> FsResult<()> {
        Ok(())
    }

    /// Close the handle, optionally syncing first. Sync errors are
    /// logged, never propagated; release always completes and always
    /// clears the slot.
    pub fn release(&self, flush_requested: bool) {
        let taken = self.handle.lock().take();
        if let Some(handle) = taken {
            if flush_requested {
                if let Err(err) = handle.file.sync_all() {
                    warn!(path = %self.path.display(), %err, "sync on release failed");
                }
            }
            // Dropping the handle closes the descriptor unconditionally.
        }
    }

    /// Whether the handle slot is currently Open.
    pub fn is_open(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Run `op` against the open descriptor, lazily opening first when
    /// the slot is Closed.
    fn with_file<T>(&self, op: impl FnOnce(&File) -> io::Result<T>) -> FsResult<T> {
        let mut guard = self.handle.lock();
        let handle = match guard.take() {
            Some(handle) => handle,
            None => {
                debug!(path = %self.path.display(), "lazy open of mirror file");
                OpenHandle::open_live(&self.mirror_path())?
            }
        };
        let result = op(&handle.file).map_err(FsError::from);
        *guard = Some(handle);
        result
    }
}

fn entry_kind(is_dir: bool) -> EntryKind {
    if is_dir {
        EntryKind::Directory
    } else {
        EntryKind::File
    }
}

/// Build the access half of an open from protocol flags.
fn open_options(flags: u32) -> OpenOptions {
    let mut opts = OpenOptions::new();
    match flags as i32 & libc::O_ACCMODE {
        libc::O_WRONLY => {
            opts.write(true);
        }
        libc::O_RDWR => {
            opts.read(true).write(true);
        }
        _ => {
            opts.read(true);
        }
    }
    opts
}

/// Seconds/nanoseconds from a stat result as a `SystemTime`. Pre-epoch
/// values clamp to the epoch.
fn system_time(secs: i64, nsecs: i64) -> SystemTime {
    if secs < 0 {
        return UNIX_EPOCH;
    }
    UNIX_EPOCH + Duration::new(secs as u64, nsecs as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_path_is_mirror_root_plus_relative() {
        let fs = FileSystem::new("/mnt/data", "/srv/shadow");
        let node = fs.make_node("/mnt/data/sub/file.txt");
        assert_eq!(node.mirror_path(), PathBuf::from("/srv/shadow/sub/file.txt"));
    }

    #[test]
    fn test_mirror_path_of_root_is_mirror_root() {
        let fs = FileSystem::new("/m", "/r");
        assert_eq!(fs.root().mirror_path(), PathBuf::from("/r"));
    }

    #[test]
    fn test_foreign_path_degenerates_to_mirror_root() {
        let fs = FileSystem::new("/m", "/r");
        let node = fs.make_node("/elsewhere/x");
        assert_eq!(node.mirror_path(), PathBuf::from("/r"));
    }

    #[test]
    fn test_system_time_clamps_pre_epoch() {
        assert_eq!(system_time(-5, 0), UNIX_EPOCH);
        assert_eq!(
            system_time(10, 500),
            UNIX_EPOCH + Duration::new(10, 500)
        );
    }
}
