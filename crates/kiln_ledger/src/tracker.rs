//! File-oriented ledger façade.
//!
//! [`FileTracker`] is what compile, archive, link and flash steps call. Each
//! run loads the previous generation read-only, answers "is this output
//! current?" against it, and builds the next generation from copied and
//! re-added items before saving it.
//!
//! Main items are keyed by their absolute path. Their dependencies are
//! keyed by path under a separate `dep` prefix, and carry the file's
//! modification time (or content hash) as change payload. A main item may
//! also carry an opaque extra-data blob, typically a hash of the command
//! line that produced it. An output that no longer exists on disk is stale
//! whatever its dependencies say.

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use kiln_common::Fingerprint;
use rayon::prelude::*;
use serde::Serialize;

use crate::error::LedgerError;
use crate::fs::{FileSystem, OsFileSystem};
use crate::generation::{
    Generation, GenerationConfig, LedgerStats, DEFAULT_SHARD_BITS, DEFAULT_SHARD_CAPACITY,
    DEFAULT_SIGNATURE,
};
use crate::storage::{LedgerPaths, DEFAULT_LEDGER_NAME};
use crate::store::{change_fingerprint, ChangeKind, ItemKind, ItemView, NewItem};

const MAIN_PREFIX: &[u8] = b"";
const DEPENDENCY_PREFIX: &[u8] = b"dep";
const VALUE_PREFIX: &[u8] = b"str";

/// How dependency changes are detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChangeDetection {
    /// Compare modification times (seconds).
    #[default]
    Timestamp,
    /// Compare content hashes.
    Content,
}

/// How much work a query does once it knows the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryMode {
    /// Stop at the first stale dependency.
    #[default]
    StopAtFirst,
    /// Check every dependency and list all stale ones.
    VerifyAll,
}

/// Options for opening a ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerOptions {
    /// Directory holding the ledger files.
    pub dir: PathBuf,
    /// Base name of the ledger files.
    pub name: String,
    /// Format signature; a mismatch starts cold.
    pub signature: String,
    /// Shard-selector bits.
    pub shard_bits: u32,
    /// Initial capacity of each shard.
    pub shard_capacity: u32,
    /// Dependency change detection.
    pub change_detection: ChangeDetection,
}

impl LedgerOptions {
    /// Default options for a ledger stored in `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            name: DEFAULT_LEDGER_NAME.to_string(),
            signature: DEFAULT_SIGNATURE.to_string(),
            shard_bits: DEFAULT_SHARD_BITS,
            shard_capacity: DEFAULT_SHARD_CAPACITY,
            change_detection: ChangeDetection::default(),
        }
    }
}

/// The outcome of a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryReport {
    /// Whether the item can be reused as is.
    pub up_to_date: bool,
    /// Paths responsible for a stale verdict: the stale dependencies, or
    /// the item itself when it is unknown or its extra data changed.
    pub stale: Vec<PathBuf>,
}

impl QueryReport {
    fn current() -> Self {
        Self {
            up_to_date: true,
            stale: Vec::new(),
        }
    }

    fn stale_item(item: &Path) -> Self {
        Self {
            up_to_date: false,
            stale: vec![item.to_path_buf()],
        }
    }
}

/// One item to check in [`FileTracker::query_many`].
#[derive(Debug, Clone, Copy)]
pub struct QueryRequest<'a> {
    /// Absolute path of the build output.
    pub item: &'a Path,
    /// Extra data the output was built with, if any.
    pub extra: Option<&'a [u8]>,
}

/// Result of [`FileTracker::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The next generation equals the previous one; nothing was written.
    Unchanged,
    /// The next generation was written to the point file.
    Persisted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Mark {
    Unknown = 0,
    UpToDate = 1,
    OutOfDate = 2,
    OutputMissing = 3,
}

impl Mark {
    fn verdict(up_to_date: bool) -> Self {
        if up_to_date {
            Mark::UpToDate
        } else {
            Mark::OutOfDate
        }
    }
}

/// Per-item verdicts reached during this run, keyed by arena index of the
/// previous generation. Kept outside the generation so it stays immutable.
#[derive(Debug)]
struct QueryMarks(Vec<AtomicU8>);

impl QueryMarks {
    fn new(len: usize) -> Self {
        Self((0..len).map(|_| AtomicU8::new(Mark::Unknown as u8)).collect())
    }

    fn get(&self, index: u32) -> Mark {
        match self.0.get(index as usize).map(|m| m.load(Ordering::Relaxed)) {
            Some(1) => Mark::UpToDate,
            Some(2) => Mark::OutOfDate,
            Some(3) => Mark::OutputMissing,
            _ => Mark::Unknown,
        }
    }

    fn set(&self, index: u32, mark: Mark) {
        if let Some(m) = self.0.get(index as usize) {
            m.store(mark as u8, Ordering::Relaxed);
        }
    }
}

/// Tracks which build outputs are stale across runs.
///
/// Queries take `&self` and only read the previous generation, so they can
/// be issued from many tasks at once. Adds, copies and the final save take
/// `&mut self` and belong to a single owner.
#[derive(Debug)]
pub struct FileTracker<F: FileSystem = OsFileSystem> {
    paths: LedgerPaths,
    detection: ChangeDetection,
    fs: F,
    previous: Generation,
    marks: QueryMarks,
    next: Generation,
    added: usize,
}

impl FileTracker {
    /// Opens the ledger on the real filesystem.
    pub fn open(options: &LedgerOptions) -> Result<Self, LedgerError> {
        Self::with_file_system(options, OsFileSystem)
    }
}

impl<F: FileSystem> FileTracker<F> {
    /// Opens the ledger, inspecting files through `fs`.
    ///
    /// Fails only on invalid options; an unreadable ledger starts cold.
    pub fn with_file_system(options: &LedgerOptions, fs: F) -> Result<Self, LedgerError> {
        let config =
            GenerationConfig::new(&options.signature, options.shard_bits, options.shard_capacity)?;
        let paths = LedgerPaths::new(&options.dir, &options.name);
        let previous = Generation::load(&paths, &config);
        let next = previous.derive();
        Ok(Self {
            paths,
            detection: options.change_detection,
            fs,
            marks: QueryMarks::new(previous.len()),
            previous,
            next,
            added: 0,
        })
    }

    /// Returns `true` if `item` still exists and all its dependencies are
    /// unchanged.
    pub fn query_item(&self, item: &Path) -> bool {
        self.query_report(item, None, QueryMode::StopAtFirst).up_to_date
    }

    /// Like [`query_item`](Self::query_item), additionally requiring the
    /// recorded extra data to equal `extra`.
    pub fn query_item_with_extra_data(&self, item: &Path, extra: &[u8]) -> bool {
        self.query_report(item, Some(extra), QueryMode::StopAtFirst)
            .up_to_date
    }

    /// Checks `item` and reports why it is stale.
    ///
    /// Every verdict is remembered for the rest of the run, so a header
    /// shared by many outputs is inspected once and a repeated query inspects
    /// nothing. A missing output is stale whatever its dependencies say.
    pub fn query_report(&self, item: &Path, extra: Option<&[u8]>, mode: QueryMode) -> QueryReport {
        let identity = Fingerprint::digest(MAIN_PREFIX, &path_bytes(item));
        let Some(view) = self
            .previous
            .find_readonly(&identity)
            .and_then(|i| self.previous.get(i))
        else {
            tracing::trace!(item = %item.display(), "not in ledger");
            return QueryReport::stale_item(item);
        };

        let (kind, data) = main_change(extra);
        if view.change_kind != kind || view.change != change_fingerprint(kind, data) {
            tracing::trace!(item = %item.display(), "extra data changed");
            return QueryReport::stale_item(item);
        }
        match self.marks.get(view.index) {
            Mark::UpToDate => return QueryReport::current(),
            Mark::OutputMissing => return QueryReport::stale_item(item),
            Mark::Unknown if self.fs.modified_secs(item).is_none() => {
                tracing::trace!(item = %item.display(), "output missing");
                self.marks.set(view.index, Mark::OutputMissing);
                return QueryReport::stale_item(item);
            }
            Mark::Unknown | Mark::OutOfDate => {}
        }

        let mut stale = Vec::new();
        for &dep in view.dependencies {
            let current = match self.marks.get(dep) {
                Mark::UpToDate => true,
                Mark::OutOfDate | Mark::OutputMissing => false,
                Mark::Unknown => {
                    let current = self
                        .previous
                        .get(dep)
                        .is_some_and(|d| self.dependency_is_current(&d));
                    self.marks.set(dep, Mark::verdict(current));
                    current
                }
            };
            if !current {
                if let Some(d) = self.previous.get(dep) {
                    let path = path_from_bytes(d.identity_data);
                    tracing::trace!(
                        item = %item.display(),
                        dependency = %path.display(),
                        "stale dependency"
                    );
                    stale.push(path);
                }
                if mode == QueryMode::StopAtFirst {
                    break;
                }
            }
        }

        let up_to_date = stale.is_empty();
        self.marks.set(view.index, Mark::verdict(up_to_date));
        QueryReport { up_to_date, stale }
    }

    /// Queries many items in parallel against the previous generation.
    pub fn query_many(&self, requests: &[QueryRequest<'_>]) -> Vec<bool> {
        requests
            .par_iter()
            .map(|r| {
                self.query_report(r.item, r.extra, QueryMode::StopAtFirst)
                    .up_to_date
            })
            .collect()
    }

    /// Returns `true` if the labelled value was recorded with exactly `value`.
    pub fn query_value(&self, label: &str, value: &[u8]) -> bool {
        let identity = Fingerprint::digest(VALUE_PREFIX, label.as_bytes());
        self.previous
            .find_readonly(&identity)
            .and_then(|i| self.previous.get(i))
            .is_some_and(|v| {
                v.change_kind == ChangeKind::Blob
                    && v.change == change_fingerprint(ChangeKind::Blob, value)
            })
    }

    /// Records `item` as built from `deps` in the next generation.
    pub fn add_item<P: AsRef<Path>>(&mut self, item: &Path, deps: &[P]) -> Result<(), LedgerError> {
        self.add(item, ChangeKind::None, &[], deps)
    }

    /// Records `item` as built from `deps` with the given extra data.
    pub fn add_item_with_extra_data<P: AsRef<Path>>(
        &mut self,
        item: &Path,
        extra: &[u8],
        deps: &[P],
    ) -> Result<(), LedgerError> {
        self.add(item, ChangeKind::Blob, extra, deps)
    }

    /// Records a labelled value in the next generation.
    pub fn add_value(&mut self, label: &str, value: &[u8]) -> Result<(), LedgerError> {
        let identity = Fingerprint::digest(VALUE_PREFIX, label.as_bytes());
        let item = NewItem::new(
            identity,
            ItemKind::String,
            label.as_bytes(),
            ChangeKind::Blob,
            value,
        );
        self.next.append(&item, &[])?;
        self.added += 1;
        Ok(())
    }

    /// Carries `item` and its dependencies into the next generation unchanged.
    ///
    /// Returns `false` if the previous generation doesn't know `item`.
    pub fn copy_item(&mut self, item: &Path) -> Result<bool, LedgerError> {
        let identity = Fingerprint::digest(MAIN_PREFIX, &path_bytes(item));
        let copied = self.previous.copy_item(&mut self.next, &identity)?;
        Ok(copied.is_some())
    }

    /// Carries a labelled value into the next generation unchanged.
    pub fn copy_value(&mut self, label: &str) -> Result<bool, LedgerError> {
        let identity = Fingerprint::digest(VALUE_PREFIX, label.as_bytes());
        let copied = self.previous.copy_item(&mut self.next, &identity)?;
        Ok(copied.is_some())
    }

    /// Writes the next generation if it differs from the previous one.
    ///
    /// The file becomes the trusted ledger on the next open.
    pub fn save(&self) -> Result<SaveOutcome, LedgerError> {
        if self.added == 0 && self.next.len() == self.previous.len() {
            tracing::debug!("ledger unchanged, skipping save");
            return Ok(SaveOutcome::Unchanged);
        }
        self.next.save(&self.paths)?;
        Ok(SaveOutcome::Persisted)
    }

    /// Stats of the generation loaded at open.
    pub fn previous_stats(&self) -> LedgerStats {
        self.previous.stats()
    }

    /// The ledger files.
    pub fn paths(&self) -> &LedgerPaths {
        &self.paths
    }

    fn add<P: AsRef<Path>>(
        &mut self,
        item: &Path,
        change_kind: ChangeKind,
        change_data: &[u8],
        deps: &[P],
    ) -> Result<(), LedgerError> {
        require_absolute(item)?;
        let mut dep_states = Vec::with_capacity(deps.len());
        for dep in deps {
            let dep = dep.as_ref();
            require_absolute(dep)?;
            let bytes = path_bytes(dep);
            let identity = Fingerprint::digest(DEPENDENCY_PREFIX, &bytes);
            let (kind, data) = self.current_change(dep).unwrap_or_else(changed_now);
            dep_states.push((identity, bytes, kind, data));
        }
        let dep_items: Vec<NewItem<'_>> = dep_states
            .iter()
            .map(|(identity, bytes, kind, data)| {
                NewItem::new(*identity, ItemKind::Dependency, bytes, *kind, data)
            })
            .collect();

        let bytes = path_bytes(item);
        let main = NewItem::new(
            Fingerprint::digest(MAIN_PREFIX, &bytes),
            ItemKind::SourceFile,
            &bytes,
            change_kind,
            change_data,
        );
        self.next.append(&main, &dep_items)?;
        self.added += 1;
        Ok(())
    }

    fn current_change(&self, path: &Path) -> Option<(ChangeKind, Vec<u8>)> {
        match self.detection {
            ChangeDetection::Timestamp => self
                .fs
                .modified_secs(path)
                .map(|secs| (ChangeKind::Timestamp, secs.to_le_bytes().to_vec())),
            ChangeDetection::Content => self
                .fs
                .content_hash(path)
                .map(|hash| (ChangeKind::ContentHash, hash.as_bytes().to_vec())),
        }
    }

    fn dependency_is_current(&self, dep: &ItemView<'_>) -> bool {
        match self.current_change(&path_from_bytes(dep.identity_data)) {
            Some((kind, data)) => {
                kind == dep.change_kind && change_fingerprint(kind, &data) == dep.change
            }
            None => false,
        }
    }
}

fn main_change(extra: Option<&[u8]>) -> (ChangeKind, &[u8]) {
    match extra {
        Some(data) => (ChangeKind::Blob, data),
        None => (ChangeKind::None, &[]),
    }
}

/// Payload recorded for a dependency that can't be inspected: the current
/// time, so it never matches a later inspection of a missing file.
fn changed_now() -> (ChangeKind, Vec<u8>) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    (ChangeKind::Timestamp, now.to_le_bytes().to_vec())
}

/// Identity bytes of a path. Lossless on Unix, where paths are raw bytes.
#[cfg(unix)]
fn path_bytes(path: &Path) -> Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;
    Cow::Borrowed(path.as_os_str().as_bytes())
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> Cow<'_, [u8]> {
    match path.to_string_lossy() {
        Cow::Borrowed(s) => Cow::Borrowed(s.as_bytes()),
        Cow::Owned(s) => Cow::Owned(s.into_bytes()),
    }
}

#[cfg(unix)]
fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(std::ffi::OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}

fn require_absolute(path: &Path) -> Result<(), LedgerError> {
    if path.is_absolute() {
        Ok(())
    } else {
        Err(LedgerError::RelativePath {
            path: path.to_path_buf(),
        })
    }
}
