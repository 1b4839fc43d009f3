//! Two-file ledger storage with rotation on load.
//!
//! `<name>.main.db` is the trusted generation and `<name>.point.db` a freshly
//! written candidate. Saving only ever writes the point file. Loading first
//! promotes a pending point file to main, so a crash between the two steps
//! replays the promotion on the next run and the trusted file is never
//! rewritten in place. The point file itself appears only once it is
//! complete: it is written under a temporary name and renamed into place.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::LedgerError;

/// Default base name for ledger files.
pub const DEFAULT_LEDGER_NAME: &str = "ledger";

/// The pair of files backing one ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerPaths {
    /// The trusted generation.
    pub main: PathBuf,
    /// The candidate written by the last save.
    pub point: PathBuf,
    /// Scratch file the candidate is written to before it becomes `point`.
    pub pending: PathBuf,
}

impl LedgerPaths {
    /// Paths for ledger `name` inside `dir`.
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            main: dir.join(format!("{name}.main.db")),
            point: dir.join(format!("{name}.point.db")),
            pending: dir.join(format!("{name}.point.db.tmp")),
        }
    }

    /// Promotes a pending point file to main.
    ///
    /// Returns `true` if a rotation happened.
    pub fn rotate(&self) -> Result<bool, LedgerError> {
        if !self.point.exists() {
            return Ok(false);
        }
        if self.main.exists() {
            std::fs::remove_file(&self.main).map_err(|e| LedgerError::Io {
                path: self.main.clone(),
                source: e,
            })?;
        }
        std::fs::rename(&self.point, &self.main).map_err(|e| LedgerError::Io {
            path: self.point.clone(),
            source: e,
        })?;
        tracing::debug!(main = %self.main.display(), "promoted pending ledger");
        Ok(true)
    }

    /// Reads the trusted generation, if there is one.
    pub fn read_main(&self) -> Option<Vec<u8>> {
        std::fs::read(&self.main).ok()
    }

    /// Writes `bytes` to the point file and syncs it to disk.
    ///
    /// Creates the ledger directory if it doesn't exist. On failure no point
    /// file is left behind, so the trusted generation stays in use.
    pub fn write_point(&self, bytes: &[u8]) -> Result<(), LedgerError> {
        if let Some(dir) = self.point.parent() {
            std::fs::create_dir_all(dir).map_err(|e| LedgerError::Io {
                path: dir.to_path_buf(),
                source: e,
            })?;
        }
        let written = write_synced(&self.pending, bytes).and_then(|()| {
            std::fs::rename(&self.pending, &self.point).map_err(|e| LedgerError::Io {
                path: self.pending.clone(),
                source: e,
            })
        });
        if written.is_err() {
            let _ = std::fs::remove_file(&self.pending);
        }
        written
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), LedgerError> {
    let io_err = |e: std::io::Error| LedgerError::Io {
        path: path.to_path_buf(),
        source: e,
    };
    let mut file = File::create(path).map_err(io_err)?;
    file.write_all(bytes).map_err(io_err)?;
    file.sync_all().map_err(io_err)
}
