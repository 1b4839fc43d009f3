//! Shared foundational types used across the Kiln build toolchain.
//!
//! This crate provides the identity fingerprint used by the build ledger,
//! content hashing for change detection, and common result types.

#![warn(missing_docs)]

pub mod hash;
pub mod result;

pub use hash::{ContentHash, Fingerprint, FINGERPRINT_LEN};
pub use result::{InternalError, KilnResult};
