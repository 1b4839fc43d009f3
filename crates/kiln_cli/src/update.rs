//! `kiln update`: record built outputs and save the ledger.
//!
//! Outputs still up to date are copied forward unchanged; the rest are
//! recorded from their dependency files as freshly built. Outputs not named
//! on the command line drop out of the ledger.

use std::collections::HashSet;

use kiln_ledger::{FileSystem, FileTracker, LedgerError, SaveOutcome};
use serde::Serialize;

use crate::session::{extra_hash, Entry, Session};
use crate::{GlobalArgs, OutputFormat, UpdateArgs};

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
struct UpdateSummary {
    reused: usize,
    recorded: usize,
    saved: bool,
}

/// Runs the `kiln update` command.
pub fn run(args: &UpdateArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let mut session = Session::open(global)?;
    let entries = session.load_entries(&args.depfiles)?;
    let extra = extra_hash(args.extra.as_deref());
    let extra = extra.as_ref().map(|h| h.as_bytes().as_slice());

    let summary = record(&mut session.tracker, &entries, extra)?;

    match global.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text => {
            if !global.quiet {
                eprintln!(
                    "   Recorded {} outputs, reused {}{}",
                    summary.recorded,
                    summary.reused,
                    if summary.saved { "" } else { " (ledger unchanged)" }
                );
            }
        }
    }
    Ok(0)
}

/// Copies current entries forward, records the rest and saves.
///
/// An output named by more than one dependency file is recorded from the
/// first one.
fn record<F: FileSystem>(
    tracker: &mut FileTracker<F>,
    entries: &[Entry],
    extra: Option<&[u8]>,
) -> Result<UpdateSummary, LedgerError> {
    let mut summary = UpdateSummary::default();
    let mut seen = HashSet::new();
    for entry in entries {
        if !seen.insert(entry.item.as_path()) {
            tracing::warn!(item = %entry.item.display(), "output named twice, keeping the first");
            continue;
        }
        let current = match extra {
            Some(data) => tracker.query_item_with_extra_data(&entry.item, data),
            None => tracker.query_item(&entry.item),
        };
        if current && tracker.copy_item(&entry.item)? {
            summary.reused += 1;
            continue;
        }
        match extra {
            Some(data) => tracker.add_item_with_extra_data(&entry.item, data, &entry.dependencies)?,
            None => tracker.add_item(&entry.item, &entry.dependencies)?,
        }
        summary.recorded += 1;
    }
    summary.saved = tracker.save()? == SaveOutcome::Persisted;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    use kiln_ledger::{LedgerOptions, MemoryFileSystem};

    struct Project {
        ledger: tempfile::TempDir,
        files: Arc<MemoryFileSystem>,
    }

    impl Project {
        fn new() -> Self {
            let files = Arc::new(MemoryFileSystem::new());
            for path in ["/src/a.c", "/src/b.c", "/src/common.h", "/obj/a.o", "/obj/b.o"] {
                files.set_mtime(path, 1);
            }
            Self {
                ledger: tempfile::tempdir().unwrap(),
                files,
            }
        }

        fn open(&self) -> FileTracker<Arc<MemoryFileSystem>> {
            let options = LedgerOptions::new(self.ledger.path());
            FileTracker::with_file_system(&options, Arc::clone(&self.files)).unwrap()
        }
    }

    fn entry(item: &str, deps: &[&str]) -> Entry {
        Entry {
            item: PathBuf::from(item),
            dependencies: deps.iter().map(PathBuf::from).collect(),
        }
    }

    fn entries() -> Vec<Entry> {
        vec![
            entry("/obj/a.o", &["/src/a.c", "/src/common.h"]),
            entry("/obj/b.o", &["/src/b.c", "/src/common.h"]),
        ]
    }

    #[test]
    fn first_run_records_everything() {
        let project = Project::new();
        let summary = record(&mut project.open(), &entries(), None).unwrap();
        assert_eq!(
            summary,
            UpdateSummary {
                reused: 0,
                recorded: 2,
                saved: true,
            }
        );
    }

    #[test]
    fn current_outputs_are_reused() {
        let project = Project::new();
        record(&mut project.open(), &entries(), None).unwrap();

        let summary = record(&mut project.open(), &entries(), None).unwrap();
        assert_eq!(
            summary,
            UpdateSummary {
                reused: 2,
                recorded: 0,
                saved: false,
            }
        );
    }

    #[test]
    fn stale_output_is_recorded_again() {
        let project = Project::new();
        record(&mut project.open(), &entries(), None).unwrap();

        project.files.set_mtime("/src/b.c", 2);
        let summary = record(&mut project.open(), &entries(), None).unwrap();
        assert_eq!(summary.reused, 1);
        assert_eq!(summary.recorded, 1);
        assert!(summary.saved);

        let tracker = project.open();
        assert!(tracker.query_item(&PathBuf::from("/obj/a.o")));
        assert!(tracker.query_item(&PathBuf::from("/obj/b.o")));
    }

    #[test]
    fn changed_extra_data_records_again() {
        let project = Project::new();
        record(&mut project.open(), &entries(), Some(b"cc -O2".as_slice())).unwrap();

        let summary = record(&mut project.open(), &entries(), Some(b"cc -O0".as_slice())).unwrap();
        assert_eq!(summary.recorded, 2);
        assert!(project
            .open()
            .query_item_with_extra_data(&PathBuf::from("/obj/a.o"), b"cc -O0"));
    }

    #[test]
    fn duplicate_target_is_recorded_once() {
        let project = Project::new();
        let mut entries = entries();
        entries.push(entry("/obj/a.o", &["/src/a.c"]));

        let summary = record(&mut project.open(), &entries, None).unwrap();
        assert_eq!(summary.recorded, 2);
        assert!(summary.saved);
        assert_eq!(project.open().previous_stats().items, 2 + 3);
    }

    #[test]
    fn summary_json_fields() {
        let summary = UpdateSummary {
            reused: 3,
            recorded: 1,
            saved: true,
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["reused"], 3);
        assert_eq!(json["recorded"], 1);
        assert_eq!(json["saved"], true);
    }
}
