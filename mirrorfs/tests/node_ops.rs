//! Integration tests for the node layer.
//!
//! The node layer talks to the mirror tree directly, so everything here
//! runs against a tempdir-backed mirror without a kernel mount:
//! - path mapping and live (uncached) attributes
//! - lookup, readdir, mkdir, remove, rename
//! - create/read/write round trips and the handle lifecycle
//!
//! Run with: `cargo test --test node_ops`

use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tempfile::TempDir;

use mirrorfs::{EntryKind, FileSystem, FsError, SetattrRequest};

// ============================================================================
// Helper Functions
// ============================================================================

/// Mount namespace prefix used by all tests. It never has to exist:
/// node operations only ever touch the mirror tree.
const MOUNT_ROOT: &str = "/m";

/// Create a filesystem backed by a fresh mirror tempdir.
fn fixture() -> (TempDir, FileSystem) {
    let mirror = tempfile::tempdir().expect("create mirror tempdir");
    let fs = FileSystem::new(MOUNT_ROOT, mirror.path());
    (mirror, fs)
}

fn current_ids() -> (u32, u32) {
    // Safe: getuid/getgid cannot fail.
    unsafe { (libc::getuid(), libc::getgid()) }
}

const RDWR_CREATE: u32 = (libc::O_RDWR | libc::O_CREAT) as u32;

// ============================================================================
// Path mapping
// ============================================================================

#[test]
fn mirror_path_is_mirror_root_plus_relative_path() {
    let (mirror, fs) = fixture();
    for rel in ["a.txt", "sub/dir/file.bin", ""] {
        let node = fs.make_node(PathBuf::from(MOUNT_ROOT).join(rel));
        assert_eq!(node.mirror_path(), mirror.path().join(rel));
    }
}

// ============================================================================
// Attributes
// ============================================================================

#[tokio::test]
async fn attr_reflects_out_of_band_mutations_immediately() {
    let (mirror, fs) = fixture();
    std::fs::write(mirror.path().join("live.txt"), b"hello").unwrap();

    let node = fs.root().lookup("live.txt").await.unwrap();
    assert_eq!(node.attr().await.unwrap().size, 5);

    // Mutate the mirror behind the node's back; the very next call must
    // observe the new size and mtime.
    std::fs::write(mirror.path().join("live.txt"), b"hello, world").unwrap();
    let stamp = filetime::FileTime::from_unix_time(1_600_000_000, 0);
    filetime::set_file_mtime(mirror.path().join("live.txt"), stamp).unwrap();

    let attr = node.attr().await.unwrap();
    assert_eq!(attr.size, 12);
    assert_eq!(
        attr.mtime,
        UNIX_EPOCH + Duration::from_secs(1_600_000_000)
    );
}

#[tokio::test]
async fn attr_on_missing_entry_is_not_found() {
    let (_mirror, fs) = fixture();
    let node = fs.make_node(PathBuf::from(MOUNT_ROOT).join("ghost"));
    assert!(matches!(node.attr().await.unwrap_err(), FsError::NotFound));
}

#[tokio::test]
async fn setattr_truncates_and_returns_live_state() {
    let (mirror, fs) = fixture();
    std::fs::write(mirror.path().join("t.txt"), b"hello").unwrap();
    let node = fs.root().lookup("t.txt").await.unwrap();

    let req = SetattrRequest {
        size: Some(2),
        ..Default::default()
    };
    let attr = node.setattr(req).await.unwrap();
    assert_eq!(attr.size, 2);
    assert_eq!(node.attr().await.unwrap().size, 2);

    // Reading up to the old length returns only the surviving bytes.
    assert_eq!(node.read(0, 5).unwrap(), b"he");
}

#[tokio::test]
async fn setattr_size_on_directory_is_a_no_op() {
    let (mirror, fs) = fixture();
    std::fs::create_dir(mirror.path().join("d")).unwrap();
    let node = fs.root().lookup("d").await.unwrap();

    let req = SetattrRequest {
        size: Some(0),
        ..Default::default()
    };
    let attr = node.setattr(req).await.unwrap();
    assert_eq!(attr.kind, EntryKind::Directory);
    assert!(mirror.path().join("d").is_dir());
}

#[tokio::test]
async fn setattr_applies_explicit_and_now_times() {
    let (mirror, fs) = fixture();
    std::fs::write(mirror.path().join("t.txt"), b"x").unwrap();
    let node = fs.root().lookup("t.txt").await.unwrap();

    let explicit = UNIX_EPOCH + Duration::from_secs(1_234_567_890);
    let req = SetattrRequest {
        mtime: Some(explicit),
        ..Default::default()
    };
    assert_eq!(node.setattr(req).await.unwrap().mtime, explicit);

    let before = SystemTime::now();
    let req = SetattrRequest {
        mtime_now: true,
        ..Default::default()
    };
    let attr = node.setattr(req).await.unwrap();
    assert!(attr.mtime >= before);
}

#[tokio::test]
async fn setattr_mode_is_applied() {
    let (mirror, fs) = fixture();
    std::fs::write(mirror.path().join("m.txt"), b"x").unwrap();
    let node = fs.root().lookup("m.txt").await.unwrap();

    let req = SetattrRequest {
        mode: Some(0o600),
        ..Default::default()
    };
    let attr = node.setattr(req).await.unwrap();
    assert_eq!(attr.perm, 0o600);
    let meta = std::fs::metadata(mirror.path().join("m.txt")).unwrap();
    assert_eq!(meta.mode() & 0o777, 0o600);
}

#[tokio::test]
async fn setattr_unmodeled_fields_are_accepted_without_effect() {
    let (mirror, fs) = fixture();
    std::fs::write(mirror.path().join("u.txt"), b"abc").unwrap();
    let node = fs.root().lookup("u.txt").await.unwrap();

    let req = SetattrRequest {
        ctime: Some(SystemTime::now()),
        lock_owner: Some(42),
        fh: Some(7),
        ..Default::default()
    };
    let attr = node.setattr(req).await.unwrap();
    assert_eq!(attr.size, 3);
}

// ============================================================================
// Directory operations
// ============================================================================

#[tokio::test]
async fn lookup_missing_entry_is_not_found() {
    let (_mirror, fs) = fixture();
    let err = fs.root().lookup("absent.txt").await.unwrap_err();
    assert!(matches!(err, FsError::NotFound));
}

#[tokio::test]
async fn lookup_existing_entry_returns_mapped_node() {
    let (mirror, fs) = fixture();
    std::fs::write(mirror.path().join("here.txt"), b"x").unwrap();
    let node = fs.root().lookup("here.txt").await.unwrap();
    assert_eq!(node.mirror_path(), mirror.path().join("here.txt"));
    assert!(node.mirror_path().exists());
}

#[tokio::test]
async fn readdir_lists_exactly_the_mirror_entries_with_types() {
    let (mirror, fs) = fixture();
    std::fs::write(mirror.path().join("x"), b"").unwrap();
    std::fs::write(mirror.path().join("y"), b"").unwrap();
    std::fs::create_dir(mirror.path().join("z")).unwrap();

    let mut entries = fs.root().read_dir_all().await.unwrap();
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    let summary: Vec<(String, EntryKind)> = entries
        .iter()
        .map(|e| (e.name.to_string_lossy().into_owned(), e.kind))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("x".to_string(), EntryKind::File),
            ("y".to_string(), EntryKind::File),
            ("z".to_string(), EntryKind::Directory),
        ]
    );
}

#[tokio::test]
async fn readdir_on_missing_directory_is_not_found() {
    let (_mirror, fs) = fixture();
    let node = fs.make_node(PathBuf::from(MOUNT_ROOT).join("nowhere"));
    assert!(matches!(
        node.read_dir_all().await.unwrap_err(),
        FsError::NotFound
    ));
}

#[tokio::test]
async fn mkdir_creates_mirror_directory_with_mode() {
    let (mirror, fs) = fixture();
    let (uid, gid) = current_ids();

    let node = fs.root().mkdir("fresh", 0o700, uid, gid).await.unwrap();
    let meta = std::fs::metadata(mirror.path().join("fresh")).unwrap();
    assert!(meta.is_dir());
    assert_eq!(meta.mode() & 0o777, 0o700);
    assert_eq!(node.attr().await.unwrap().kind, EntryKind::Directory);
}

#[tokio::test]
async fn mkdir_existing_directory_already_exists() {
    let (mirror, fs) = fixture();
    std::fs::create_dir(mirror.path().join("dup")).unwrap();
    let (uid, gid) = current_ids();

    let err = fs.root().mkdir("dup", 0o755, uid, gid).await.unwrap_err();
    assert!(matches!(err, FsError::AlreadyExists));
}

#[tokio::test]
async fn remove_deletes_files_and_empty_directories() {
    let (mirror, fs) = fixture();
    std::fs::write(mirror.path().join("gone.txt"), b"x").unwrap();
    std::fs::create_dir(mirror.path().join("hollow")).unwrap();

    fs.root().remove("gone.txt").await.unwrap();
    fs.root().remove("hollow").await.unwrap();
    assert!(!mirror.path().join("gone.txt").exists());
    assert!(!mirror.path().join("hollow").exists());

    let err = fs.root().remove("gone.txt").await.unwrap_err();
    assert!(matches!(err, FsError::NotFound));
}

#[tokio::test]
async fn rename_moves_content_and_identity() {
    let (mirror, fs) = fixture();
    std::fs::write(mirror.path().join("a.txt"), b"payload").unwrap();

    let root = fs.root();
    let dest = fs.root();
    root.rename("a.txt", &dest, "b.txt").await.unwrap();

    let err = root.lookup("a.txt").await.unwrap_err();
    assert!(matches!(err, FsError::NotFound));

    let moved = root.lookup("b.txt").await.unwrap();
    assert_eq!(moved.read(0, 64).unwrap(), b"payload");
}

#[tokio::test]
async fn rename_overwrites_an_existing_destination() {
    let (mirror, fs) = fixture();
    std::fs::write(mirror.path().join("src"), b"new").unwrap();
    std::fs::write(mirror.path().join("dst"), b"old").unwrap();

    let root = fs.root();
    root.rename("src", &fs.root(), "dst").await.unwrap();
    assert_eq!(std::fs::read(mirror.path().join("dst")).unwrap(), b"new");
    assert!(!mirror.path().join("src").exists());
}

#[tokio::test]
async fn rename_to_a_foreign_filesystem_is_type_mismatch() {
    let (mirror, fs) = fixture();
    std::fs::write(mirror.path().join("a.txt"), b"x").unwrap();

    let other = FileSystem::new(MOUNT_ROOT, mirror.path());
    let err = fs
        .root()
        .rename("a.txt", &other.root(), "b.txt")
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::TypeMismatch));
    // Nothing moved.
    assert!(mirror.path().join("a.txt").exists());
}

// ============================================================================
// File operations and handle lifecycle
// ============================================================================

#[tokio::test]
async fn write_then_read_round_trip() {
    let (mirror, fs) = fixture();
    let node = fs.root().create("a.txt", RDWR_CREATE, 0o644).unwrap();

    assert_eq!(node.write(0, b"hello").unwrap(), 5);
    assert_eq!(node.read(0, 5).unwrap(), b"hello");

    // The mirror file is the durable record.
    assert_eq!(std::fs::read(mirror.path().join("a.txt")).unwrap(), b"hello");
}

#[tokio::test]
async fn create_accepts_a_read_only_access_mode() {
    let (mirror, fs) = fixture();
    let flags = (libc::O_RDONLY | libc::O_CREAT) as u32;

    let node = fs.root().create("ro.txt", flags, 0o644).unwrap();
    assert!(mirror.path().join("ro.txt").exists());
    assert!(node.is_open());

    // The descriptor is readable; the new file is empty.
    assert_eq!(node.read(0, 16).unwrap(), b"");
}

#[tokio::test]
async fn read_past_end_of_file_returns_short_not_error() {
    let (_mirror, fs) = fixture();
    let node = fs.root().create("short.txt", RDWR_CREATE, 0o644).unwrap();
    node.write(0, b"ab").unwrap();

    assert_eq!(node.read(0, 100).unwrap(), b"ab");
    assert_eq!(node.read(2, 100).unwrap(), b"");
}

#[tokio::test]
async fn read_lazily_opens_a_closed_handle() {
    let (mirror, fs) = fixture();
    std::fs::write(mirror.path().join("cold.txt"), b"content").unwrap();

    let node = fs.root().lookup("cold.txt").await.unwrap();
    assert!(!node.is_open());
    assert_eq!(node.read(0, 7).unwrap(), b"content");
    assert!(node.is_open());
}

#[tokio::test]
async fn read_on_missing_file_is_not_found() {
    let (_mirror, fs) = fixture();
    let node = fs.make_node(PathBuf::from(MOUNT_ROOT).join("void.txt"));
    assert!(matches!(node.read(0, 1).unwrap_err(), FsError::NotFound));
}

#[tokio::test]
async fn release_clears_the_handle_and_always_completes() {
    let (_mirror, fs) = fixture();
    let node = fs.root().create("r.txt", RDWR_CREATE, 0o644).unwrap();
    node.write(0, b"data").unwrap();
    assert!(node.is_open());

    node.release(true);
    assert!(!node.is_open());

    // Releasing a closed handle is harmless.
    node.release(false);
    assert!(!node.is_open());

    // A later read transitions back to Open through the lazy path.
    assert_eq!(node.read(0, 4).unwrap(), b"data");
}

#[tokio::test]
async fn fsync_is_a_no_op_on_a_closed_handle() {
    let (mirror, fs) = fixture();
    std::fs::write(mirror.path().join("s.txt"), b"x").unwrap();
    let node = fs.root().lookup("s.txt").await.unwrap();

    node.fsync().unwrap();
    assert!(!node.is_open(), "fsync must not reopen the handle");

    node.read(0, 1).unwrap();
    node.fsync().unwrap();
    node.flush().unwrap();
    assert!(node.is_open());
}

#[tokio::test]
async fn independent_nodes_for_one_path_own_independent_handles() {
    let (mirror, fs) = fixture();
    std::fs::write(mirror.path().join("shared.txt"), b"0123456789").unwrap();

    let first = fs.root().lookup("shared.txt").await.unwrap();
    let second = fs.root().lookup("shared.txt").await.unwrap();

    assert_eq!(first.read(0, 5).unwrap(), b"01234");
    assert!(first.is_open());
    assert!(!second.is_open());

    second.release(false);
    assert!(first.is_open(), "release on one node must not touch another");
}

// ============================================================================
// End-to-end scenario
// ============================================================================

#[tokio::test]
async fn create_write_read_truncate_scenario() {
    let (mirror, fs) = fixture();
    let root = fs.root();

    let node = root.create("a.txt", RDWR_CREATE, 0o644).unwrap();
    assert!(mirror.path().join("a.txt").exists());

    node.write(0, b"hello").unwrap();
    assert_eq!(node.read(0, 5).unwrap(), b"hello");

    let req = SetattrRequest {
        size: Some(2),
        ..Default::default()
    };
    node.setattr(req).await.unwrap();

    assert_eq!(node.attr().await.unwrap().size, 2);
    assert_eq!(node.read(0, 5).unwrap(), b"he");

    node.release(true);
    assert_eq!(std::fs::read(mirror.path().join("a.txt")).unwrap(), b"he");
}
