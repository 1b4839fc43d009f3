//! Common result and error types for the Kiln toolchain.

/// The standard result type for fallible internal operations.
///
/// `Err` indicates an unrecoverable internal error (a bug in Kiln), not a
/// user-facing error. Stale or missing build outputs are never reported
/// through this type.
pub type KilnResult<T> = Result<T, InternalError>;

/// An internal error indicating a bug in Kiln, not a user input problem.
#[derive(Debug, thiserror::Error)]
#[error("internal error: {message}")]
pub struct InternalError {
    /// Description of the internal error.
    pub message: String,
}

impl InternalError {
    /// Creates a new internal error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for InternalError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_format() {
        let err = InternalError::new("shard index out of sync");
        assert_eq!(format!("{err}"), "internal error: shard index out of sync");
    }

    #[test]
    fn err_path() {
        let r: KilnResult<u32> = Err(InternalError::new("test error"));
        let err = r.err().unwrap();
        assert_eq!(err.message, "test error");
    }

    #[test]
    fn from_string() {
        let err: InternalError = "from string".to_string().into();
        assert_eq!(err.message, "from string");
    }
}
