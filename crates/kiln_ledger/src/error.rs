//! Error types for ledger operations.

use std::path::PathBuf;

use kiln_common::Fingerprint;

/// Errors surfaced by the build ledger.
///
/// Loading never fails: a missing, truncated or mismatched ledger file is a
/// cold start, not an error. What remains are caller mistakes, unreadable
/// dependency files and persistence failures.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// An I/O error occurred while writing or rotating ledger files.
    #[error("ledger I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// An item with this identity already exists in the generation.
    #[error("item {identity} already exists in this generation")]
    DuplicateItem {
        /// Identity fingerprint of the rejected item.
        identity: Fingerprint,
    },

    /// A path given to the tracker was not absolute.
    #[error("ledger paths must be absolute: {path}")]
    RelativePath {
        /// The offending path.
        path: PathBuf,
    },

    /// A compiler dependency file could not be read or parsed.
    #[error("failed to parse dependency file {path}: {reason}")]
    DepFileParse {
        /// The dependency file path (empty when parsing from memory).
        path: PathBuf,
        /// Description of the parse failure.
        reason: String,
    },

    /// A column grew past what the 32-bit on-disk format can address.
    #[error("ledger capacity exceeded: too many {what}")]
    CapacityExceeded {
        /// The column that overflowed.
        what: &'static str,
    },

    /// The ledger options are not representable in the on-disk format.
    #[error("invalid ledger configuration: {reason}")]
    InvalidConfig {
        /// Description of the problem.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_display() {
        let err = LedgerError::Io {
            path: PathBuf::from("/tmp/build/ledger.point.db"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("ledger I/O error"));
        assert!(msg.contains("ledger.point.db"));
    }

    #[test]
    fn duplicate_item_display() {
        let identity = Fingerprint::digest(b"", b"/obj/a.o");
        let msg = LedgerError::DuplicateItem { identity }.to_string();
        assert!(msg.contains(&identity.to_string()));
        assert!(msg.contains("already exists"));
    }

    #[test]
    fn relative_path_display() {
        let err = LedgerError::RelativePath {
            path: PathBuf::from("src/a.c"),
        };
        assert!(err.to_string().contains("src/a.c"));
    }

    #[test]
    fn dep_file_parse_display() {
        let err = LedgerError::DepFileParse {
            path: PathBuf::from("a.d"),
            reason: "missing ':' after target".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("a.d"));
        assert!(msg.contains("missing ':'"));
    }

    #[test]
    fn invalid_config_display() {
        let err = LedgerError::InvalidConfig {
            reason: "shard_bits must be between 1 and 16".to_string(),
        };
        assert!(err.to_string().starts_with("invalid ledger configuration"));
    }
}
