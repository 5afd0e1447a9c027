//! Filesystem enumeration
//!
//! The walker never touches `std::fs` directly. It goes through the
//! [`FileSystem`] trait so the traversal engine can run against the real
//! filesystem ([`OsFileSystem`]) or against a scripted tree
//! ([`MemoryFileSystem`]) that can fake hardlinks, broken directory link
//! counts and listings without type information.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::warn;

/// Kind of a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
    /// The listing did not say; a metadata fetch is needed to find out
    Unknown,
}

impl From<fs::FileType> for EntryKind {
    fn from(ft: fs::FileType) -> Self {
        if ft.is_dir() {
            return EntryKind::Directory;
        }
        if ft.is_file() {
            return EntryKind::File;
        }
        if ft.is_symlink() {
            return EntryKind::Symlink;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;
            if ft.is_block_device() {
                return EntryKind::BlockDevice;
            }
            if ft.is_char_device() {
                return EntryKind::CharDevice;
            }
            if ft.is_fifo() {
                return EntryKind::Fifo;
            }
            if ft.is_socket() {
                return EntryKind::Socket;
            }
        }
        EntryKind::Unknown
    }
}

/// One name returned by a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub name: OsString,
    pub kind: EntryKind,
}

impl RawEntry {
    pub fn new(name: impl Into<OsString>, kind: EntryKind) -> Self {
        Self { name: name.into(), kind }
    }

    /// `.` and `..`
    pub fn is_dot(&self) -> bool {
        self.name == "." || self.name == ".."
    }
}

/// The metadata the scanner cares about, already flattened to plain integers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMetadata {
    /// Size in bytes
    pub size: u64,
    /// Modification time, seconds since the epoch
    pub mtime: i64,
    /// Access time, seconds since the epoch
    pub atime: i64,
    pub uid: u32,
    pub gid: u32,
    /// Hard link count; for directories normally 2 + number of subdirectories
    pub nlink: u64,
    pub device: u64,
    pub inode: u64,
    /// Allocated storage in 512-byte blocks
    pub blocks: u64,
    pub kind: EntryKind,
}

impl EntryMetadata {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Source of directory listings and metadata
pub trait FileSystem: Send + Sync {
    /// List the names in a directory. `.` and `..` may or may not be present.
    fn list_entries(&self, path: &Path) -> io::Result<Vec<RawEntry>>;

    /// Metadata of `path` itself, without following a final symlink
    fn symlink_metadata(&self, path: &Path) -> io::Result<EntryMetadata>;

    /// Metadata of `path`, following symlinks
    fn metadata(&self, path: &Path) -> io::Result<EntryMetadata>;
}

/// The real filesystem, via `std::fs`
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFileSystem;

impl OsFileSystem {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for OsFileSystem {
    fn list_entries(&self, path: &Path) -> io::Result<Vec<RawEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Error reading directory entry in {}: {}", path.display(), e);
                    continue;
                }
            };
            let kind = entry
                .file_type()
                .map(EntryKind::from)
                .unwrap_or(EntryKind::Unknown);
            entries.push(RawEntry::new(entry.file_name(), kind));
        }
        Ok(entries)
    }

    fn symlink_metadata(&self, path: &Path) -> io::Result<EntryMetadata> {
        fs::symlink_metadata(path).map(|m| convert_metadata(&m))
    }

    fn metadata(&self, path: &Path) -> io::Result<EntryMetadata> {
        fs::metadata(path).map(|m| convert_metadata(&m))
    }
}

#[cfg(unix)]
fn convert_metadata(meta: &fs::Metadata) -> EntryMetadata {
    use std::os::unix::fs::MetadataExt;

    EntryMetadata {
        size: meta.size(),
        mtime: meta.mtime(),
        atime: meta.atime(),
        uid: meta.uid(),
        gid: meta.gid(),
        nlink: meta.nlink(),
        device: meta.dev(),
        inode: meta.ino(),
        blocks: meta.blocks(),
        kind: EntryKind::from(meta.file_type()),
    }
}

// Without st_nlink every directory reports 0 links, which sends the walker
// straight into the untrusted-link-count mode.
#[cfg(not(unix))]
fn convert_metadata(meta: &fs::Metadata) -> EntryMetadata {
    use std::time::{SystemTime, UNIX_EPOCH};

    fn secs(t: io::Result<SystemTime>) -> i64 {
        t.ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    let kind = EntryKind::from(meta.file_type());
    EntryMetadata {
        size: meta.len(),
        mtime: secs(meta.modified()),
        atime: secs(meta.accessed()),
        uid: 0,
        gid: 0,
        nlink: if kind == EntryKind::Directory { 0 } else { 1 },
        device: 0,
        inode: 0,
        blocks: (meta.len() + 511) / 512,
        kind,
    }
}

#[derive(Debug, Clone)]
struct MemoryNode {
    meta: EntryMetadata,
    children: Vec<OsString>,
    unreadable: bool,
}

/// A scripted, in-memory directory tree
///
/// Built up front through `&mut self` methods, then shared read-only with the
/// scanner. Parents are created on demand (`mkdir -p` style). Directories
/// report `2 + subdirectories` links unless [`with_directory_link_count`]
/// pins a fixed value, and occupy no blocks.
///
/// [`with_directory_link_count`]: MemoryFileSystem::with_directory_link_count
#[derive(Debug, Clone)]
pub struct MemoryFileSystem {
    nodes: HashMap<PathBuf, MemoryNode>,
    next_inode: u64,
    next_device: u64,
    directory_link_count: Option<u64>,
    hide_types: bool,
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            next_inode: 2,
            next_device: 1,
            directory_link_count: None,
            hide_types: false,
        }
    }

    /// Report this link count for every directory, like btrfs (1) or some
    /// network filesystems (0) do
    pub fn with_directory_link_count(mut self, nlink: u64) -> Self {
        self.directory_link_count = Some(nlink);
        self
    }

    /// Make listings return [`EntryKind::Unknown`] for every name
    pub fn with_unknown_types(mut self) -> Self {
        self.hide_types = true;
        self
    }

    /// Create a directory and any missing parents
    pub fn dir(&mut self, path: impl AsRef<Path>) -> &mut Self {
        let path = path.as_ref();
        if !self.nodes.contains_key(path) {
            let device = self.parent_device(path);
            let meta = self.fresh_metadata(EntryKind::Directory, 0, device);
            self.insert(path, meta);
        }
        self
    }

    /// Create a directory that lives on a filesystem of its own
    pub fn mount(&mut self, path: impl AsRef<Path>) -> &mut Self {
        self.next_device += 1;
        let device = self.next_device;
        let meta = self.fresh_metadata(EntryKind::Directory, 0, device);
        self.insert(path.as_ref(), meta);
        self
    }

    /// Create a regular file of `size` bytes
    pub fn file(&mut self, path: impl AsRef<Path>, size: u64) -> &mut Self {
        let path = path.as_ref();
        let device = self.parent_device(path);
        let meta = self.fresh_metadata(EntryKind::File, size, device);
        self.insert(path, meta);
        self
    }

    /// Create an entry of an arbitrary kind with size 0
    pub fn special(&mut self, path: impl AsRef<Path>, kind: EntryKind) -> &mut Self {
        let path = path.as_ref();
        let device = self.parent_device(path);
        let meta = self.fresh_metadata(kind, 0, device);
        self.insert(path, meta);
        self
    }

    /// Add another name for the file at `existing`
    pub fn hardlink(&mut self, existing: impl AsRef<Path>, new: impl AsRef<Path>) -> &mut Self {
        let Some(node) = self.nodes.get(existing.as_ref()) else {
            return self;
        };
        let mut meta = node.meta;
        meta.nlink += 1;
        for other in self.nodes.values_mut() {
            if other.meta.inode == meta.inode && other.meta.device == meta.device {
                other.meta.nlink = meta.nlink;
            }
        }
        self.insert(new.as_ref(), meta);
        self
    }

    pub fn set_times(&mut self, path: impl AsRef<Path>, mtime: i64, atime: i64) -> &mut Self {
        if let Some(node) = self.nodes.get_mut(path.as_ref()) {
            node.meta.mtime = mtime;
            node.meta.atime = atime;
        }
        self
    }

    pub fn set_owner(&mut self, path: impl AsRef<Path>, uid: u32, gid: u32) -> &mut Self {
        if let Some(node) = self.nodes.get_mut(path.as_ref()) {
            node.meta.uid = uid;
            node.meta.gid = gid;
        }
        self
    }

    /// Listing this directory fails with `PermissionDenied`
    pub fn deny(&mut self, path: impl AsRef<Path>) -> &mut Self {
        if let Some(node) = self.nodes.get_mut(path.as_ref()) {
            node.unreadable = true;
        }
        self
    }

    fn parent_device(&self, path: &Path) -> u64 {
        path.parent()
            .and_then(|p| self.nodes.get(p))
            .map(|n| n.meta.device)
            .unwrap_or(1)
    }

    fn fresh_metadata(&mut self, kind: EntryKind, size: u64, device: u64) -> EntryMetadata {
        let inode = self.next_inode;
        self.next_inode += 1;
        EntryMetadata {
            size,
            mtime: 0,
            atime: 0,
            uid: 0,
            gid: 0,
            nlink: if kind == EntryKind::Directory { 2 } else { 1 },
            device,
            inode,
            blocks: if kind == EntryKind::Directory { 0 } else { (size + 511) / 512 },
            kind,
        }
    }

    fn insert(&mut self, path: &Path, meta: EntryMetadata) {
        if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
            if !parent.as_os_str().is_empty() {
                self.dir(parent);
                if let Some(parent_node) = self.nodes.get_mut(parent) {
                    if !parent_node.children.iter().any(|c| c == name) {
                        parent_node.children.push(name.to_os_string());
                    }
                }
            }
        }
        self.nodes.insert(
            path.to_path_buf(),
            MemoryNode {
                meta,
                children: Vec::new(),
                unreadable: false,
            },
        );
    }

    fn lookup(&self, path: &Path) -> io::Result<&MemoryNode> {
        self.nodes.get(path).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "No such file or directory")
        })
    }
}

impl FileSystem for MemoryFileSystem {
    fn list_entries(&self, path: &Path) -> io::Result<Vec<RawEntry>> {
        let node = self.lookup(path)?;
        if !node.meta.is_dir() {
            return Err(io::Error::new(io::ErrorKind::Other, "Not a directory"));
        }
        if node.unreadable {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "Permission denied"));
        }

        let mut entries = vec![
            RawEntry::new(".", EntryKind::Directory),
            RawEntry::new("..", EntryKind::Directory),
        ];
        for name in &node.children {
            let kind = if self.hide_types {
                EntryKind::Unknown
            } else {
                self.nodes
                    .get(&path.join(name))
                    .map(|n| n.meta.kind)
                    .unwrap_or(EntryKind::Unknown)
            };
            entries.push(RawEntry::new(name.clone(), kind));
        }
        Ok(entries)
    }

    fn symlink_metadata(&self, path: &Path) -> io::Result<EntryMetadata> {
        let node = self.lookup(path)?;
        let mut meta = node.meta;
        if meta.is_dir() {
            meta.nlink = match self.directory_link_count {
                Some(pinned) => pinned,
                None => {
                    let subdirs = node
                        .children
                        .iter()
                        .filter(|name| {
                            self.nodes
                                .get(&path.join(name))
                                .map(|n| n.meta.is_dir())
                                .unwrap_or(false)
                        })
                        .count() as u64;
                    2 + subdirs
                }
            };
        }
        Ok(meta)
    }

    fn metadata(&self, path: &Path) -> io::Result<EntryMetadata> {
        self.symlink_metadata(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_os_listing_and_metadata() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        File::create(temp_dir.path().join("file1.txt"))?.write_all(b"test")?;
        std::fs::create_dir(temp_dir.path().join("dir1"))?;

        let fs = OsFileSystem::new();
        let mut entries = fs.list_entries(temp_dir.path())?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(
            entries,
            vec![
                RawEntry::new("dir1", EntryKind::Directory),
                RawEntry::new("file1.txt", EntryKind::File),
            ]
        );

        let meta = fs.symlink_metadata(&temp_dir.path().join("file1.txt"))?;
        assert_eq!(meta.size, 4);
        assert_eq!(meta.kind, EntryKind::File);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_os_symlink_metadata_does_not_follow() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let target = temp_dir.path().join("target");
        std::fs::create_dir(&target)?;
        let link = temp_dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link)?;

        let fs = OsFileSystem::new();
        assert_eq!(fs.symlink_metadata(&link)?.kind, EntryKind::Symlink);
        assert_eq!(fs.metadata(&link)?.kind, EntryKind::Directory);
        Ok(())
    }

    #[test]
    fn test_memory_link_counts() -> io::Result<()> {
        let mut fs = MemoryFileSystem::new();
        fs.dir("/r/a").dir("/r/b").file("/r/f", 10);

        assert_eq!(fs.symlink_metadata(Path::new("/r"))?.nlink, 4);
        assert_eq!(fs.symlink_metadata(Path::new("/r/a"))?.nlink, 2);

        let broken = fs.clone().with_directory_link_count(1);
        assert_eq!(broken.symlink_metadata(Path::new("/r"))?.nlink, 1);
        Ok(())
    }

    #[test]
    fn test_memory_hardlink_shares_inode() -> io::Result<()> {
        let mut fs = MemoryFileSystem::new();
        fs.file("/r/one", 1000).hardlink("/r/one", "/r/two");

        let one = fs.symlink_metadata(Path::new("/r/one"))?;
        let two = fs.symlink_metadata(Path::new("/r/two"))?;
        assert_eq!(one.inode, two.inode);
        assert_eq!(one.nlink, 2);
        assert_eq!(two.nlink, 2);
        Ok(())
    }

    #[test]
    fn test_memory_listing_includes_dots_and_hides_types() -> io::Result<()> {
        let mut fs = MemoryFileSystem::new();
        fs.dir("/r/sub");
        let fs = fs.with_unknown_types();

        let entries = fs.list_entries(Path::new("/r"))?;
        assert_eq!(entries.iter().filter(|e| e.is_dot()).count(), 2);
        let sub = entries.iter().find(|e| e.name == "sub").unwrap();
        assert_eq!(sub.kind, EntryKind::Unknown);
        Ok(())
    }

    #[test]
    fn test_memory_denied_listing() {
        let mut fs = MemoryFileSystem::new();
        fs.dir("/r/locked").deny("/r/locked");
        let err = fs.list_entries(Path::new("/r/locked")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }
}
