//! Generations: load, derive, copy forward, save.
//!
//! A generation is one complete snapshot of the ledger. The previous
//! generation is loaded read-only; the next one starts empty and is filled by
//! copying validated items forward and appending changed ones. Nothing is
//! ever modified in place.
//!
//! On disk a generation is a 64-byte header followed by each column in a
//! fixed order:
//!
//! | Offset | Size | Field |
//! |---|---|---|
//! | 0 | 32 | signature, zero padded |
//! | 32 | 4 | item count |
//! | 36 | 4 | dependency array length |
//! | 40 | 4 | payload pool length |
//! | 44 | 4 | shard bit count |
//! | 48 | 4 | shard capacity |
//! | 52 | 4 | shard array length |
//! | 56 | 8 | zero |

use kiln_common::Fingerprint;
use serde::Serialize;

use crate::codec::{ByteReader, ByteWriter, DecodeError};
use crate::error::LedgerError;
use crate::storage::LedgerPaths;
use crate::store::{ColumnLengths, ItemStore, ItemView, NewItem};

/// Size of the signature field in the header.
pub const SIGNATURE_LEN: usize = 32;

/// Size of the fixed header.
pub const HEADER_LEN: usize = 64;

/// Default number of shard-selector bits (1024 shards).
pub const DEFAULT_SHARD_BITS: u32 = 10;

/// Default initial capacity of each shard.
pub const DEFAULT_SHARD_CAPACITY: u32 = 512;

/// Largest supported shard bit count.
pub const MAX_SHARD_BITS: u32 = 16;

/// Default ledger signature. Bump on any format change.
pub const DEFAULT_SIGNATURE: &str = "kiln-ledger-v1";

/// Immutable parameters of a generation, fixed when the ledger is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationConfig {
    signature: String,
    shard_bits: u32,
    shard_capacity: u32,
}

impl GenerationConfig {
    /// Validates and builds a configuration.
    pub fn new(signature: &str, shard_bits: u32, shard_capacity: u32) -> Result<Self, LedgerError> {
        if signature.is_empty() || signature.len() > SIGNATURE_LEN {
            return Err(LedgerError::InvalidConfig {
                reason: format!(
                    "signature must be 1 to {SIGNATURE_LEN} bytes, got {}",
                    signature.len()
                ),
            });
        }
        if signature.contains('\0') {
            return Err(LedgerError::InvalidConfig {
                reason: "signature must not contain NUL".to_string(),
            });
        }
        if !(1..=MAX_SHARD_BITS).contains(&shard_bits) {
            return Err(LedgerError::InvalidConfig {
                reason: format!(
                    "shard_bits must be between 1 and {MAX_SHARD_BITS}, got {shard_bits}"
                ),
            });
        }
        if shard_capacity == 0 {
            return Err(LedgerError::InvalidConfig {
                reason: "shard_capacity must be positive".to_string(),
            });
        }
        Ok(Self {
            signature: signature.to_string(),
            shard_bits,
            shard_capacity,
        })
    }

    /// The ledger signature.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Number of shard-selector bits.
    pub fn shard_bits(&self) -> u32 {
        self.shard_bits
    }

    /// Initial capacity of each shard.
    pub fn shard_capacity(&self) -> u32 {
        self.shard_capacity
    }

    fn signature_field(&self) -> [u8; SIGNATURE_LEN] {
        let mut field = [0u8; SIGNATURE_LEN];
        field[..self.signature.len()].copy_from_slice(self.signature.as_bytes());
        field
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            signature: DEFAULT_SIGNATURE.to_string(),
            shard_bits: DEFAULT_SHARD_BITS,
            shard_capacity: DEFAULT_SHARD_CAPACITY,
        }
    }
}

/// Summary counts for one generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    /// Number of items.
    pub items: usize,
    /// Entries in the flat dependency array.
    pub dependency_links: usize,
    /// Bytes in the payload pool.
    pub payload_bytes: usize,
    /// Number of shards.
    pub shards: usize,
    /// Shards holding at least one item.
    pub occupied_shards: usize,
    /// Items in the fullest shard.
    pub longest_shard: usize,
}

/// One snapshot of the ledger.
#[derive(Debug, Clone)]
pub struct Generation {
    config: GenerationConfig,
    store: ItemStore,
}

impl Generation {
    /// Creates an empty generation.
    pub fn empty(config: &GenerationConfig) -> Self {
        Self::with_capacity(config, 0, 0, 0)
    }

    fn with_capacity(config: &GenerationConfig, items: usize, deps: usize, payload: usize) -> Self {
        Self {
            config: config.clone(),
            store: ItemStore::with_capacity(
                items,
                deps,
                payload,
                config.shard_bits,
                config.shard_capacity,
            ),
        }
    }

    /// Loads the trusted generation, promoting a pending one first.
    ///
    /// Never fails: a missing file, wrong signature, changed shard
    /// parameters or any truncated or inconsistent column yields an empty
    /// generation. The result is sealed, so read-only lookups are safe.
    pub fn load(paths: &LedgerPaths, config: &GenerationConfig) -> Self {
        if let Err(e) = paths.rotate() {
            tracing::warn!(error = %e, "failed to promote pending ledger");
        }
        let Some(bytes) = paths.read_main() else {
            tracing::debug!(path = %paths.main.display(), "no ledger found, starting cold");
            return Self::empty(config);
        };
        match Self::decode(&bytes, config) {
            Ok(mut generation) => {
                generation.store.seal();
                tracing::debug!(items = generation.len(), "loaded ledger");
                generation
            }
            Err(e) => {
                tracing::debug!(
                    reason = %e,
                    path = %paths.main.display(),
                    "discarding ledger, starting cold"
                );
                Self::empty(config)
            }
        }
    }

    /// Creates the next, empty generation with ~10% headroom over this one.
    pub fn derive(&self) -> Self {
        let lengths = self.store.column_lengths();
        Self::with_capacity(
            &self.config,
            lengths.items + lengths.items / 10,
            lengths.dependencies + lengths.dependencies / 10,
            lengths.payload + lengths.payload / 10,
        )
    }

    /// Copies an item and its dependencies into `dst`.
    ///
    /// Returns the item's index in `dst`, or `None` if this generation
    /// doesn't hold `identity`. Items and dependencies already present in
    /// `dst` are reused rather than duplicated.
    pub fn copy_item(
        &self,
        dst: &mut Generation,
        identity: &Fingerprint,
    ) -> Result<Option<u32>, LedgerError> {
        let Some(view) = self.find_readonly(identity).and_then(|i| self.get(i)) else {
            return Ok(None);
        };
        if let Some(existing) = dst.find(identity) {
            return Ok(Some(existing));
        }
        let deps: Vec<NewItem<'_>> = view
            .dependencies
            .iter()
            .filter_map(|&d| self.get(d))
            .map(|d| d.as_new_item())
            .collect();
        dst.store.append(&view.as_new_item(), &deps).map(Some)
    }

    /// Serializes this generation to the point file.
    pub fn save(&self, paths: &LedgerPaths) -> Result<(), LedgerError> {
        let bytes = self.encode();
        paths.write_point(&bytes)?;
        tracing::info!(
            items = self.len(),
            bytes = bytes.len(),
            path = %paths.point.display(),
            "saved ledger"
        );
        Ok(())
    }

    /// Appends an item and its dependencies. See [`ItemStore::append`].
    pub fn append(&mut self, item: &NewItem<'_>, deps: &[NewItem<'_>]) -> Result<u32, LedgerError> {
        self.store.append(item, deps)
    }

    /// Returns a view of item `index`.
    pub fn get(&self, index: u32) -> Option<ItemView<'_>> {
        self.store.get(index)
    }

    /// Finds an item by identity.
    pub fn find(&mut self, identity: &Fingerprint) -> Option<u32> {
        self.store.find(identity)
    }

    /// Finds an item by identity without mutating the index.
    pub fn find_readonly(&self, identity: &Fingerprint) -> Option<u32> {
        self.store.find_readonly(identity)
    }

    /// Returns `true` if an item with this identity exists.
    pub fn does_item_exist(&mut self, identity: &Fingerprint) -> bool {
        self.store.does_item_exist(identity)
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Returns `true` if the generation holds no items.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// The generation's configuration.
    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Summary counts.
    pub fn stats(&self) -> LedgerStats {
        let index = self.store.index();
        let (occupied_shards, longest_shard) = index
            .shards()
            .fold((0, 0), |(occupied, longest), run| {
                (occupied + usize::from(!run.is_empty()), longest.max(run.len()))
            });
        LedgerStats {
            items: self.store.len(),
            dependency_links: self.store.dependency_links(),
            payload_bytes: self.store.payload_len(),
            shards: index.shard_count(),
            occupied_shards,
            longest_shard,
        }
    }

    /// Encodes the header and every column.
    pub fn encode(&self) -> Vec<u8> {
        let lengths = self.store.column_lengths();
        let mut w = ByteWriter::with_capacity(HEADER_LEN + lengths.payload);
        w.put_bytes(&self.config.signature_field());
        w.put_u32(lengths.items as u32);
        w.put_u32(lengths.dependencies as u32);
        w.put_u32(lengths.payload as u32);
        w.put_u32(self.config.shard_bits);
        w.put_u32(self.config.shard_capacity);
        w.put_u32(self.store.index().len() as u32);
        w.pad_to(HEADER_LEN);
        self.store.encode(&mut w);
        w.into_inner()
    }

    fn decode(bytes: &[u8], config: &GenerationConfig) -> Result<Self, DecodeError> {
        let mut r = ByteReader::new(bytes);
        if r.take(SIGNATURE_LEN)? != config.signature_field().as_slice() {
            return Err(DecodeError::Inconsistent("signature mismatch".to_string()));
        }
        let lengths = ColumnLengths {
            items: r.u32()? as usize,
            dependencies: r.u32()? as usize,
            payload: r.u32()? as usize,
        };
        let shard_bits = r.u32()?;
        let shard_capacity = r.u32()?;
        let shard_array_len = r.u32()? as usize;
        if shard_bits != config.shard_bits || shard_capacity != config.shard_capacity {
            return Err(DecodeError::Inconsistent(format!(
                "shard parameters changed from {shard_bits}/{shard_capacity}"
            )));
        }
        r.seek_to(HEADER_LEN)?;

        let store = ItemStore::decode(
            &mut r,
            lengths,
            shard_bits,
            shard_capacity,
            shard_array_len,
        )?;
        if r.remaining() != 0 {
            return Err(DecodeError::Inconsistent(format!(
                "{} trailing bytes",
                r.remaining()
            )));
        }
        Ok(Self {
            config: config.clone(),
            store,
        })
    }
}
