//! fuse3 adapter: dispatches each protocol operation onto a node.
//!
//! The adapter is deliberately thin. Every operation constructs (or
//! fetches from the handle table) the node for the named path, calls the
//! matching node method, and translates [`FsError`] into a protocol
//! errno at the boundary. Attribute TTLs are zero throughout: the node
//! layer never caches, so the kernel is told not to either.

use std::ffi::{OsStr, OsString};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use dashmap::DashMap;
use fuse3::path::prelude::*;
use fuse3::path::reply::DirectoryEntryPlus;
use fuse3::{Errno, FileType, SetAttr, Timestamp};
use tracing::debug;

use crate::error::FsError;
use crate::fs::{EntryKind, FileSystem, Node, NodeAttr, SetattrRequest};

/// Attributes are never cached by design; tell the kernel the same.
const TTL: Duration = Duration::ZERO;

/// Largest single write the kernel may send.
const MAX_WRITE: NonZeroU32 = match NonZeroU32::new(128 * 1024) {
    Some(n) => n,
    None => unreachable!(),
};

/// The filesystem as seen by the fuse3 session.
pub struct MirrorFs {
    fs: FileSystem,
    /// Open handles: each fh maps to the node instance that owns the
    /// descriptor. Nodes are never shared between handles.
    handles: DashMap<u64, Arc<Node>>,
    next_fh: AtomicU64,
}

impl MirrorFs {
    pub fn new(fs: FileSystem) -> Self {
        Self {
            fs,
            handles: DashMap::new(),
            next_fh: AtomicU64::new(1),
        }
    }

    fn register(&self, node: Arc<Node>) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        self.handles.insert(fh, node);
        fh
    }

    fn handle(&self, fh: u64) -> Result<Arc<Node>, Errno> {
        self.handles
            .get(&fh)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Errno::from(libc::EBADF))
    }

    /// Node for `path`, preferring the instance bound to `fh` so that
    /// operations on an open file keep talking to the descriptor owner.
    fn node_or_handle(&self, path: Option<&OsStr>, fh: Option<u64>) -> Result<Arc<Node>, Errno> {
        if let Some(node) = fh.and_then(|fh| self.handles.get(&fh).map(|e| e.value().clone())) {
            return Ok(node);
        }
        let path = path.ok_or_else(Errno::new_not_exist)?;
        Ok(Arc::new(self.fs.node_at(path)))
    }
}

impl PathFilesystem for MirrorFs {
    async fn init(&self, _req: Request) -> Result<ReplyInit, Errno> {
        debug!(
            mount = %self.fs.mount_root().display(),
            mirror = %self.fs.mirror_root().display(),
            "filesystem initialized"
        );
        Ok(ReplyInit {
            max_write: MAX_WRITE,
        })
    }

    async fn destroy(&self, _req: Request) {}

    async fn lookup(
        &self,
        _req: Request,
        parent: &OsStr,
        name: &OsStr,
    ) -> Result<ReplyEntry, Errno> {
        let child = self.fs.node_at(parent).lookup(name).await?;
        let attr = child.attr().await?;
        Ok(ReplyEntry {
            ttl: TTL,
            attr: file_attr(&attr),
        })
    }

    async fn getattr(
        &self,
        _req: Request,
        path: Option<&OsStr>,
        fh: Option<u64>,
        _flags: u32,
    ) -> Result<ReplyAttr, Errno> {
        let node = self.node_or_handle(path, fh)?;
        let attr = node.attr().await?;
        Ok(ReplyAttr {
            ttl: TTL,
            attr: file_attr(&attr),
        })
    }

    async fn setattr(
        &self,
        _req: Request,
        path: Option<&OsStr>,
        fh: Option<u64>,
        set_attr: SetAttr,
    ) -> Result<ReplyAttr, Errno> {
        let node = self.node_or_handle(path, fh)?;
        let attr = node.setattr(setattr_request(&set_attr)).await?;
        Ok(ReplyAttr {
            ttl: TTL,
            attr: file_attr(&attr),
        })
    }

    async fn mkdir(
        &self,
        req: Request,
        parent: &OsStr,
        name: &OsStr,
        mode: u32,
        _umask: u32,
    ) -> Result<ReplyEntry, Errno> {
        let child = self
            .fs
            .node_at(parent)
            .mkdir(name, mode, req.uid, req.gid)
            .await?;
        let attr = child.attr().await?;
        Ok(ReplyEntry {
            ttl: TTL,
            attr: file_attr(&attr),
        })
    }

    async fn unlink(&self, _req: Request, parent: &OsStr, name: &OsStr) -> Result<(), Errno> {
        self.fs.node_at(parent).remove(name).await?;
        Ok(())
    }

    async fn rmdir(&self, _req: Request, parent: &OsStr, name: &OsStr) -> Result<(), Errno> {
        self.fs.node_at(parent).remove(name).await?;
        Ok(())
    }

    async fn rename(
        &self,
        _req: Request,
        origin_parent: &OsStr,
        origin_name: &OsStr,
        parent: &OsStr,
        name: &OsStr,
    ) -> Result<(), Errno> {
        let source = self.fs.node_at(origin_parent);
        let dest = self.fs.node_at(parent);
        source.rename(origin_name, &dest, name).await?;
        Ok(())
    }

    async fn create(
        &self,
        _req: Request,
        parent: &OsStr,
        name: &OsStr,
        mode: u32,
        flags: u32,
    ) -> Result<ReplyCreated, Errno> {
        let child = self.fs.node_at(parent).create(name, flags, mode)?;
        let attr = child.attr().await?;
        let fh = self.register(Arc::new(child));
        Ok(ReplyCreated {
            ttl: TTL,
            attr: file_attr(&attr),
            generation: 0,
            fh,
            flags: 0,
        })
    }

    async fn open(&self, _req: Request, path: &OsStr, _flags: u32) -> Result<ReplyOpen, Errno> {
        // The descriptor is bound lazily, by the first read or write on
        // the registered node.
        let fh = self.register(Arc::new(self.fs.node_at(path)));
        Ok(ReplyOpen { fh, flags: 0 })
    }

    async fn read(
        &self,
        _req: Request,
        _path: Option<&OsStr>,
        fh: u64,
        offset: u64,
        size: u32,
    ) -> Result<ReplyData, Errno> {
        let node = self.handle(fh)?;
        let data = node.read(offset, size)?;
        Ok(Bytes::from(data).into())
    }

    async fn write(
        &self,
        _req: Request,
        _path: Option<&OsStr>,
        fh: u64,
        offset: u64,
        data: &[u8],
        _write_flags: u32,
        _flags: u32,
    ) -> Result<ReplyWrite, Errno> {
        let node = self.handle(fh)?;
        let written = node.write(offset, data)?;
        Ok(ReplyWrite {
            written: written as u32,
        })
    }

    async fn flush(
        &self,
        _req: Request,
        _path: Option<&OsStr>,
        fh: u64,
        _lock_owner: u64,
    ) -> Result<(), Errno> {
        let node = self.handle(fh)?;
        node.flush()?;
        Ok(())
    }

    async fn fsync(
        &self,
        _req: Request,
        _path: Option<&OsStr>,
        fh: u64,
        _datasync: bool,
    ) -> Result<(), Errno> {
        let node = self.handle(fh)?;
        node.fsync()?;
        Ok(())
    }

    async fn release(
        &self,
        _req: Request,
        _path: Option<&OsStr>,
        fh: u64,
        _flags: u32,
        _lock_owner: u64,
        flush: bool,
    ) -> Result<(), Errno> {
        // Release must always complete and always clear the handle.
        if let Some((_, node)) = self.handles.remove(&fh) {
            node.release(flush);
        }
        Ok(())
    }

    async fn opendir(&self, _req: Request, path: &OsStr, flags: u32) -> Result<ReplyOpen, Errno> {
        let fh = self.register(Arc::new(self.fs.node_at(path)));
        Ok(ReplyOpen { fh, flags })
    }

    async fn releasedir(
        &self,
        _req: Request,
        _path: &OsStr,
        fh: u64,
        _flags: u32,
    ) -> Result<(), Errno> {
        self.handles.remove(&fh);
        Ok(())
    }

    type DirEntryStream<'a>
        = futures_util::stream::Iter<std::vec::IntoIter<fuse3::Result<DirectoryEntry>>>
    where
        Self: 'a;
    type DirEntryPlusStream<'a>
        = futures_util::stream::Iter<std::vec::IntoIter<fuse3::Result<DirectoryEntryPlus>>>
    where
        Self: 'a;

    async fn readdir<'a>(
        &'a self,
        _req: Request,
        path: &'a OsStr,
        fh: u64,
        offset: i64,
    ) -> Result<ReplyDirectory<Self::DirEntryStream<'a>>, Errno> {
        let node = self.node_or_handle(Some(path), Some(fh))?;
        let listing = node.read_dir_all().await?;

        let mut entries: Vec<fuse3::Result<DirectoryEntry>> = Vec::with_capacity(listing.len() + 2);
        let mut next_offset: i64 = 1;
        for name in [".", ".."] {
            entries.push(Ok(DirectoryEntry {
                kind: FileType::Directory,
                name: OsString::from(name),
                offset: next_offset,
            }));
            next_offset += 1;
        }
        for entry in listing {
            entries.push(Ok(DirectoryEntry {
                kind: file_type(entry.kind),
                name: entry.name,
                offset: next_offset,
            }));
            next_offset += 1;
        }

        let entries: Vec<_> = entries.into_iter().skip(offset.max(0) as usize).collect();
        Ok(ReplyDirectory {
            entries: futures_util::stream::iter(entries),
        })
    }

    async fn readdirplus<'a>(
        &'a self,
        _req: Request,
        parent: &'a OsStr,
        fh: u64,
        offset: u64,
        _lock_owner: u64,
    ) -> Result<ReplyDirectoryPlus<Self::DirEntryPlusStream<'a>>, Errno> {
        let node = self.node_or_handle(Some(parent), Some(fh))?;
        let dir_attr = file_attr(&node.attr().await?);
        let listing = node.read_dir_all().await?;

        let mut entries: Vec<fuse3::Result<DirectoryEntryPlus>> =
            Vec::with_capacity(listing.len() + 2);
        let mut next_offset: i64 = 1;
        for name in [".", ".."] {
            entries.push(Ok(DirectoryEntryPlus {
                kind: FileType::Directory,
                name: OsString::from(name),
                offset: next_offset,
                attr: dir_attr,
                entry_ttl: TTL,
                attr_ttl: TTL,
            }));
            next_offset += 1;
        }
        for entry in listing {
            let child = self.fs.make_node(node.path().join(&entry.name));
            let attr = match child.attr().await {
                Ok(attr) => file_attr(&attr),
                Err(err) => {
                    // Entry vanished between the listing and the stat.
                    entries.push(Err(err.into()));
                    continue;
                }
            };
            entries.push(Ok(DirectoryEntryPlus {
                kind: file_type(entry.kind),
                name: entry.name,
                offset: next_offset,
                attr,
                entry_ttl: TTL,
                attr_ttl: TTL,
            }));
            next_offset += 1;
        }

        let entries: Vec<_> = entries.into_iter().skip(offset as usize).collect();
        Ok(ReplyDirectoryPlus {
            entries: futures_util::stream::iter(entries),
        })
    }

    async fn statfs(&self, _req: Request, _path: &OsStr) -> Result<ReplyStatFs, Errno> {
        let stats = nix::sys::statvfs::statvfs(self.fs.mirror_root())
            .map_err(|err| Errno::from(FsError::from(err)))?;
        Ok(ReplyStatFs {
            blocks: stats.blocks(),
            bfree: stats.blocks_free(),
            bavail: stats.blocks_available(),
            files: stats.files(),
            ffree: stats.files_free(),
            bsize: stats.block_size() as u32,
            namelen: stats.name_max() as u32,
            frsize: stats.fragment_size() as u32,
        })
    }
}

fn file_type(kind: EntryKind) -> FileType {
    match kind {
        EntryKind::Directory => FileType::Directory,
        EntryKind::File => FileType::RegularFile,
    }
}

fn file_attr(attr: &NodeAttr) -> FileAttr {
    FileAttr {
        size: attr.size,
        blocks: attr.blocks,
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        kind: file_type(attr.kind),
        perm: attr.perm as u16,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: attr.rdev,
        blksize: attr.blksize,
    }
}

fn setattr_request(set_attr: &SetAttr) -> SetattrRequest {
    SetattrRequest {
        size: set_attr.size,
        uid: set_attr.uid,
        gid: set_attr.gid,
        mode: set_attr.mode,
        atime: set_attr.atime.map(system_time),
        atime_now: false,
        mtime: set_attr.mtime.map(system_time),
        mtime_now: false,
        ctime: set_attr.ctime.map(system_time),
        lock_owner: set_attr.lock_owner,
        fh: None,
    }
}

fn system_time(ts: Timestamp) -> SystemTime {
    if ts.sec < 0 {
        return UNIX_EPOCH;
    }
    UNIX_EPOCH + Duration::new(ts.sec as u64, ts.nsec)
}
