//! Shared setup for ledger commands: configuration, thread pool, ledger
//! and dependency-file loading.

use std::path::{Path, PathBuf};

use kiln_common::{ContentHash, InternalError};
use kiln_config::ProjectConfig;
use kiln_ledger::{parse_dependency_file, FileTracker};

use crate::GlobalArgs;

/// One build output and the inputs it is built from, with absolute paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The output.
    pub item: PathBuf,
    /// Its inputs.
    pub dependencies: Vec<PathBuf>,
}

/// An opened ledger together with the configuration it came from.
pub struct Session {
    /// The project directory relative paths are resolved against.
    pub project_dir: PathBuf,
    /// The tracker over the project's ledger.
    pub tracker: FileTracker,
}

impl Session {
    /// Loads the configuration, sizes the worker pool and opens the ledger.
    pub fn open(global: &GlobalArgs) -> Result<Self, Box<dyn std::error::Error>> {
        let cwd = std::env::current_dir()?;
        let (project_dir, config) = load_project(&cwd, global.config.as_deref())?;
        if let Some(jobs) = config.build.jobs {
            rayon::ThreadPoolBuilder::new()
                .num_threads(jobs)
                .build_global()
                .map_err(|e| InternalError::new(format!("failed to start worker pool: {e}")))?;
        }
        let options = config.ledger.ledger_options(&project_dir);
        tracing::debug!(dir = %options.dir.display(), "opening ledger");
        let tracker = FileTracker::open(&options)?;
        Ok(Self {
            project_dir,
            tracker,
        })
    }

    /// Parses dependency files into entries with absolute paths.
    ///
    /// Paths inside a dependency file are relative to the directory the
    /// compiler ran in, taken to be the project directory.
    pub fn load_entries(
        &self,
        depfiles: &[PathBuf],
    ) -> Result<Vec<Entry>, Box<dyn std::error::Error>> {
        depfiles
            .iter()
            .map(|depfile| -> Result<Entry, Box<dyn std::error::Error>> {
                let parsed = parse_dependency_file(depfile)?;
                Ok(Entry {
                    item: absolutize(&self.project_dir, &parsed.target),
                    dependencies: parsed
                        .dependencies
                        .iter()
                        .map(|d| absolutize(&self.project_dir, d))
                        .collect(),
                })
            })
            .collect()
    }
}

/// Resolves the project directory and loads its configuration.
///
/// An explicit config file makes its directory the project directory.
fn load_project(
    cwd: &Path,
    config_path: Option<&Path>,
) -> Result<(PathBuf, ProjectConfig), kiln_config::ConfigError> {
    match config_path {
        Some(path) => {
            let path = absolutize(cwd, path);
            let config = kiln_config::load_config_file(&path)?;
            let dir = path.parent().map_or_else(|| cwd.to_path_buf(), Path::to_path_buf);
            Ok((dir, config))
        }
        None => Ok((cwd.to_path_buf(), kiln_config::load_config(cwd)?)),
    }
}

/// Hashes a command line into the extra-data blob stored with outputs.
pub fn extra_hash(command_line: Option<&str>) -> Option<ContentHash> {
    command_line.map(|line| {
        let args: Vec<&str> = line.split_whitespace().collect();
        ContentHash::from_args(&args)
    })
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolutize_keeps_absolute() {
        assert_eq!(
            absolutize(Path::new("/work"), Path::new("/src/a.c")),
            PathBuf::from("/src/a.c")
        );
        assert_eq!(
            absolutize(Path::new("/work"), Path::new("src/a.c")),
            PathBuf::from("/work/src/a.c")
        );
    }

    #[test]
    fn extra_hash_ignores_spacing() {
        assert_eq!(extra_hash(Some("cc  -O2")), extra_hash(Some("cc -O2")));
        assert_ne!(extra_hash(Some("cc -O2")), extra_hash(Some("cc -O0")));
        assert!(extra_hash(None).is_none());
    }

    #[test]
    fn project_defaults_without_config() {
        let dir = tempfile::tempdir().unwrap();
        let (project, config) = load_project(dir.path(), None).unwrap();
        assert_eq!(project, dir.path());
        assert_eq!(config.ledger.name, "ledger");
    }

    #[test]
    fn explicit_config_sets_project_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ci = dir.path().join("ci");
        std::fs::create_dir_all(&ci).unwrap();
        std::fs::write(ci.join("kiln.toml"), "[ledger]\nname = \"ci\"\n").unwrap();

        let (project, config) = load_project(dir.path(), Some(Path::new("ci/kiln.toml"))).unwrap();
        assert_eq!(project, ci);
        assert_eq!(config.ledger.name, "ci");
    }
}
