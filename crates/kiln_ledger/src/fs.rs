//! Filesystem access used to decide whether dependencies changed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::UNIX_EPOCH;

use kiln_common::ContentHash;

/// Source of file change information.
///
/// `None` means the file can't be inspected; the tracker treats that as a
/// change.
pub trait FileSystem: Send + Sync {
    /// Modification time in whole seconds since the Unix epoch.
    fn modified_secs(&self, path: &Path) -> Option<u64>;

    /// Hash of the file's contents.
    fn content_hash(&self, path: &Path) -> Option<ContentHash>;
}

impl<T: FileSystem + ?Sized> FileSystem for Arc<T> {
    fn modified_secs(&self, path: &Path) -> Option<u64> {
        (**self).modified_secs(path)
    }

    fn content_hash(&self, path: &Path) -> Option<ContentHash> {
        (**self).content_hash(path)
    }
}

/// The real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn modified_secs(&self, path: &Path) -> Option<u64> {
        let modified = std::fs::metadata(path).ok()?.modified().ok()?;
        modified.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
    }

    fn content_hash(&self, path: &Path) -> Option<ContentHash> {
        std::fs::read(path).ok().map(|bytes| ContentHash::from_bytes(&bytes))
    }
}

#[derive(Debug, Clone)]
struct MemoryFile {
    mtime: u64,
    contents: Vec<u8>,
}

/// An in-memory filesystem that counts how often it is inspected.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: Mutex<HashMap<PathBuf, MemoryFile>>,
    inspections: AtomicUsize,
}

impl MemoryFileSystem {
    /// Creates an empty filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or touches a file, keeping its contents.
    pub fn set_mtime(&self, path: impl Into<PathBuf>, mtime: u64) {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files
            .entry(path.into())
            .and_modify(|f| f.mtime = mtime)
            .or_insert_with(|| MemoryFile {
                mtime,
                contents: Vec::new(),
            });
    }

    /// Creates or overwrites a file.
    pub fn write(&self, path: impl Into<PathBuf>, mtime: u64, contents: &[u8]) {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files.insert(
            path.into(),
            MemoryFile {
                mtime,
                contents: contents.to_vec(),
            },
        );
    }

    /// Deletes a file.
    pub fn remove(&self, path: &Path) {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files.remove(path);
    }

    /// Number of `modified_secs`/`content_hash` calls so far.
    pub fn inspections(&self) -> usize {
        self.inspections.load(Ordering::Relaxed)
    }

    fn file(&self, path: &Path) -> Option<MemoryFile> {
        self.inspections.fetch_add(1, Ordering::Relaxed);
        let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files.get(path).cloned()
    }
}

impl FileSystem for MemoryFileSystem {
    fn modified_secs(&self, path: &Path) -> Option<u64> {
        self.file(path).map(|f| f.mtime)
    }

    fn content_hash(&self, path: &Path) -> Option<ContentHash> {
        self.file(path).map(|f| ContentHash::from_bytes(&f.contents))
    }
}
