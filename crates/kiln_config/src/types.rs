//! Configuration types deserialized from `kiln.toml`.

use std::path::{Path, PathBuf};

use kiln_ledger::generation::{DEFAULT_SHARD_BITS, DEFAULT_SHARD_CAPACITY, DEFAULT_SIGNATURE};
use kiln_ledger::storage::DEFAULT_LEDGER_NAME;
use kiln_ledger::{ChangeDetection, LedgerOptions};
use serde::Deserialize;

/// Default ledger directory, relative to the project directory.
pub const DEFAULT_LEDGER_DIR: &str = ".kiln";

/// The top-level configuration parsed from `kiln.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct ProjectConfig {
    /// Project metadata.
    #[serde(default)]
    pub project: ProjectMeta,
    /// Ledger location and format parameters.
    #[serde(default)]
    pub ledger: LedgerConfig,
    /// Build settings.
    #[serde(default)]
    pub build: BuildConfig,
}

/// Project metadata.
#[derive(Debug, Default, Deserialize)]
pub struct ProjectMeta {
    /// The project name.
    #[serde(default)]
    pub name: String,
}

/// The `[ledger]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    /// Directory holding the ledger files, relative to the project directory
    /// unless absolute.
    pub dir: PathBuf,
    /// Base name of the ledger files.
    pub name: String,
    /// Format signature. Changing it discards the existing ledger.
    pub signature: String,
    /// Shard-selector bits; the index has `2^shard_bits` shards.
    pub shard_bits: u32,
    /// Initial capacity of each shard.
    pub shard_capacity: u32,
    /// How dependency changes are detected.
    pub change_detection: ChangeDetectionSetting,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_LEDGER_DIR),
            name: DEFAULT_LEDGER_NAME.to_string(),
            signature: DEFAULT_SIGNATURE.to_string(),
            shard_bits: DEFAULT_SHARD_BITS,
            shard_capacity: DEFAULT_SHARD_CAPACITY,
            change_detection: ChangeDetectionSetting::default(),
        }
    }
}

impl LedgerConfig {
    /// Ledger options with `dir` resolved against `project_dir`.
    pub fn ledger_options(&self, project_dir: &Path) -> LedgerOptions {
        LedgerOptions {
            dir: project_dir.join(&self.dir),
            name: self.name.clone(),
            signature: self.signature.clone(),
            shard_bits: self.shard_bits,
            shard_capacity: self.shard_capacity,
            change_detection: self.change_detection.into(),
        }
    }
}

/// Change detection mode as written in `kiln.toml`.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeDetectionSetting {
    /// Compare modification times (default).
    #[default]
    Timestamp,
    /// Compare file contents.
    Content,
}

impl From<ChangeDetectionSetting> for ChangeDetection {
    fn from(setting: ChangeDetectionSetting) -> Self {
        match setting {
            ChangeDetectionSetting::Timestamp => ChangeDetection::Timestamp,
            ChangeDetectionSetting::Content => ChangeDetection::Content,
        }
    }
}

/// The `[build]` table.
#[derive(Debug, Default, Deserialize)]
pub struct BuildConfig {
    /// Worker threads for parallel queries. Defaults to one per core.
    pub jobs: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_defaults() {
        let ledger = LedgerConfig::default();
        assert_eq!(ledger.dir, PathBuf::from(".kiln"));
        assert_eq!(ledger.name, "ledger");
        assert_eq!(ledger.shard_bits, 10);
        assert_eq!(ledger.shard_capacity, 512);
        assert_eq!(ledger.change_detection, ChangeDetectionSetting::Timestamp);
    }

    #[test]
    fn options_resolve_relative_dir() {
        let ledger = LedgerConfig::default();
        let options = ledger.ledger_options(Path::new("/work/proj"));
        assert_eq!(options.dir, PathBuf::from("/work/proj/.kiln"));
        assert_eq!(options.change_detection, ChangeDetection::Timestamp);
    }

    #[test]
    fn options_keep_absolute_dir() {
        let ledger = LedgerConfig {
            dir: PathBuf::from("/var/cache/kiln"),
            change_detection: ChangeDetectionSetting::Content,
            ..LedgerConfig::default()
        };
        let options = ledger.ledger_options(Path::new("/work/proj"));
        assert_eq!(options.dir, PathBuf::from("/var/cache/kiln"));
        assert_eq!(options.change_detection, ChangeDetection::Content);
    }
}
