//! Incremental build ledger.
//!
//! Records which inputs every build output was produced from, and answers on
//! the next run whether an output can be reused. Each run loads the previous
//! generation from disk, checks outputs against it, and writes a new
//! generation holding only what is still valid:
//!
//! ```no_run
//! use std::path::Path;
//! use kiln_ledger::{FileTracker, LedgerOptions};
//!
//! # fn main() -> Result<(), kiln_ledger::LedgerError> {
//! let mut tracker = FileTracker::open(&LedgerOptions::new("/work/out/.kiln"))?;
//! let object = Path::new("/work/out/a.o");
//! if tracker.query_item(object) {
//!     tracker.copy_item(object)?;
//! } else {
//!     // ... rebuild a.o ...
//!     tracker.add_item(object, &["/work/src/a.cpp", "/work/src/a.h"])?;
//! }
//! tracker.save()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod codec;
pub mod depfile;
pub mod error;
pub mod fs;
pub mod generation;
pub mod shard;
pub mod storage;
pub mod store;
pub mod tracker;

pub use depfile::{parse_dependency_file, parse_dependency_str, DepFile};
pub use error::LedgerError;
pub use fs::{FileSystem, MemoryFileSystem, OsFileSystem};
pub use generation::{Generation, GenerationConfig, LedgerStats};
pub use storage::LedgerPaths;
pub use store::{ChangeKind, ItemKind, ItemStore, ItemView, NewItem};
pub use tracker::{
    ChangeDetection, FileTracker, LedgerOptions, QueryMode, QueryReport, QueryRequest, SaveOutcome,
};
