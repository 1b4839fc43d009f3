//! Bounds-checked little-endian column encoding.
//!
//! Every column of a generation is written as one contiguous run of
//! little-endian values and read back through a [`ByteReader`] that refuses
//! to read past the end of its buffer.

use kiln_common::{Fingerprint, FINGERPRINT_LEN};

/// A decode failure. Loading turns any of these into a cold start.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum DecodeError {
    /// The buffer ended before a column was complete.
    #[error("truncated read: wanted {wanted} bytes, {remaining} remaining")]
    Truncated { wanted: usize, remaining: usize },

    /// The data decoded but is not a consistent generation.
    #[error("inconsistent ledger: {0}")]
    Inconsistent(String),
}

/// Appends little-endian values to a growable buffer.
#[derive(Debug, Default)]
pub(crate) struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub(crate) fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn put_u16_column(&mut self, values: &[u16]) {
        self.buf.reserve(values.len() * 2);
        for v in values {
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    pub(crate) fn put_u32_column(&mut self, values: &[u32]) {
        self.buf.reserve(values.len() * 4);
        for v in values {
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    pub(crate) fn put_fingerprint_column(&mut self, values: &[Fingerprint]) {
        self.buf.reserve(values.len() * FINGERPRINT_LEN);
        for fp in values {
            self.buf.extend_from_slice(fp.as_bytes());
        }
    }

    /// Pads with zeros up to `len` total bytes.
    pub(crate) fn pad_to(&mut self, len: usize) {
        if self.buf.len() < len {
            self.buf.resize(len, 0);
        }
    }

    pub(crate) fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads little-endian values from a borrowed buffer.
#[derive(Debug)]
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if n > self.remaining() {
            return Err(DecodeError::Truncated {
                wanted: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Skips forward to absolute offset `pos`.
    pub(crate) fn seek_to(&mut self, pos: usize) -> Result<(), DecodeError> {
        if pos < self.pos {
            return Err(DecodeError::Inconsistent(format!(
                "cannot seek backwards from {} to {pos}",
                self.pos
            )));
        }
        self.take(pos - self.pos).map(|_| ())
    }

    pub(crate) fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn u16_column(&mut self, count: usize) -> Result<Vec<u16>, DecodeError> {
        let bytes = self.take(checked_len(count, 2)?)?;
        Ok(bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect())
    }

    pub(crate) fn u32_column(&mut self, count: usize) -> Result<Vec<u32>, DecodeError> {
        let bytes = self.take(checked_len(count, 4)?)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    pub(crate) fn fingerprint_column(
        &mut self,
        count: usize,
    ) -> Result<Vec<Fingerprint>, DecodeError> {
        let bytes = self.take(checked_len(count, FINGERPRINT_LEN)?)?;
        Ok(bytes
            .chunks_exact(FINGERPRINT_LEN)
            .map(|c| {
                let mut raw = [0u8; FINGERPRINT_LEN];
                raw.copy_from_slice(c);
                Fingerprint::from_raw(raw)
            })
            .collect())
    }
}

fn checked_len(count: usize, width: usize) -> Result<usize, DecodeError> {
    count
        .checked_mul(width)
        .ok_or_else(|| DecodeError::Inconsistent(format!("column of {count} entries overflows")))
}
