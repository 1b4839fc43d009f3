//! Identity fingerprints and content hashes for the build ledger.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Size in bytes of a [`Fingerprint`].
pub const FINGERPRINT_LEN: usize = 20;

/// A 160-bit identity or change fingerprint.
///
/// Computed with BLAKE3 in extendable-output mode and truncated to
/// [`FINGERPRINT_LEN`] bytes. Fingerprints name ledger items and record the
/// change state of their payloads; ordering is plain byte-wise comparison,
/// which is what the ledger's shard index sorts by.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Digests `bytes` under a kind prefix.
    ///
    /// The prefix is length-delimited before the content, so `("de", "pfoo")`
    /// and `("dep", "foo")` produce different fingerprints.
    pub fn digest(kind_prefix: &[u8], bytes: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(kind_prefix.len() as u32).to_le_bytes());
        hasher.update(kind_prefix);
        hasher.update(bytes);
        let mut out = [0u8; FINGERPRINT_LEN];
        hasher.finalize_xof().fill(&mut out);
        Self(out)
    }

    /// Wraps raw fingerprint bytes, e.g. when decoding a stored column.
    pub const fn from_raw(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the raw fingerprint bytes.
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// Returns the value of the top `bits` bits, used to select a shard.
    ///
    /// `bits` of zero always selects shard 0.
    pub fn shard_of(&self, bits: u32) -> usize {
        if bits == 0 {
            return 0;
        }
        let top = u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]);
        (top >> (32 - bits.min(32))) as usize
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Fingerprint({:02x}{:02x}{:02x}{:02x}..)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// A 128-bit content hash computed using XXH3.
///
/// Two files with the same `ContentHash` are assumed to have identical
/// content. The ledger uses it as a change payload when tracking file
/// contents instead of modification times, and the toolchain uses it to
/// condense a resolved command line into an extra-data blob.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    /// Computes a content hash from a byte slice using XXH3-128.
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = xxhash_rust::xxh3::xxh3_128(data);
        Self(hash.to_le_bytes())
    }

    /// Hashes a list of command-line arguments.
    ///
    /// Arguments are NUL-separated, so `["-DX", "Y"]` and `["-DX Y"]` differ.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Self {
        let mut joined = Vec::new();
        for arg in args {
            joined.extend_from_slice(arg.as_ref().as_bytes());
            joined.push(0);
        }
        Self::from_bytes(&joined)
    }

    /// Returns the raw hash bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}
