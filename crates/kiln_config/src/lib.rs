//! Parsing and validation of `kiln.toml` project configuration files.
//!
//! The file is optional; every table and field has a default. The
//! `[ledger]` table maps onto [`kiln_ledger::LedgerOptions`].

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_file, load_config_from_str, CONFIG_FILE_NAME};
pub use types::*;
