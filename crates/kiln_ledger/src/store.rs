//! Columnar item store.
//!
//! All items of a generation live in parallel fixed-width columns: the
//! fields of item `i` sit at index `i` in every column. Variable-length
//! identity and change payloads share one byte pool, and dependency lists are
//! contiguous ranges of a flat index array. Each column serializes as a
//! single contiguous run.

use kiln_common::Fingerprint;

use crate::codec::{ByteReader, ByteWriter, DecodeError};
use crate::error::LedgerError;
use crate::shard::ShardIndex;

/// What an item's identity names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ItemKind {
    /// A build artifact or source tracked in its own right.
    SourceFile = 1,
    /// A file another item depends on.
    Dependency = 2,
    /// An opaque labelled value.
    String = 4,
}

impl ItemKind {
    fn from_bits(bits: u16) -> Option<Self> {
        match bits {
            1 => Some(Self::SourceFile),
            2 => Some(Self::Dependency),
            4 => Some(Self::String),
            _ => None,
        }
    }
}

/// What an item's change payload holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ChangeKind {
    /// No payload; freshness comes from dependencies alone.
    None = 0,
    /// An 8-byte little-endian modification time in seconds.
    Timestamp = 1,
    /// A 16-byte file content hash.
    ContentHash = 2,
    /// An opaque caller-provided blob, such as a command-line hash.
    Blob = 3,
}

impl ChangeKind {
    fn from_bits(bits: u16) -> Option<Self> {
        match bits {
            0 => Some(Self::None),
            1 => Some(Self::Timestamp),
            2 => Some(Self::ContentHash),
            3 => Some(Self::Blob),
            _ => None,
        }
    }
}

/// Fingerprint of a change payload.
pub fn change_fingerprint(kind: ChangeKind, data: &[u8]) -> Fingerprint {
    Fingerprint::digest(&(kind as u16).to_le_bytes(), data)
}

/// An item about to be appended.
#[derive(Debug, Clone, Copy)]
pub struct NewItem<'a> {
    /// Identity fingerprint, unique within a generation.
    pub identity: Fingerprint,
    /// Identity kind.
    pub kind: ItemKind,
    /// Human-readable identity bytes, usually the path.
    pub identity_data: &'a [u8],
    /// Fingerprint of `change_data`.
    pub change: Fingerprint,
    /// Kind of change payload.
    pub change_kind: ChangeKind,
    /// Change payload compared across generations.
    pub change_data: &'a [u8],
}

impl<'a> NewItem<'a> {
    /// Builds an item, fingerprinting its change payload.
    pub fn new(
        identity: Fingerprint,
        kind: ItemKind,
        identity_data: &'a [u8],
        change_kind: ChangeKind,
        change_data: &'a [u8],
    ) -> Self {
        Self {
            identity,
            kind,
            identity_data,
            change: change_fingerprint(change_kind, change_data),
            change_kind,
            change_data,
        }
    }
}

/// A borrowed view of one stored item.
#[derive(Debug, Clone, Copy)]
pub struct ItemView<'a> {
    /// Arena index of the item.
    pub index: u32,
    /// Identity fingerprint.
    pub identity: Fingerprint,
    /// Identity kind.
    pub kind: ItemKind,
    /// Identity payload bytes.
    pub identity_data: &'a [u8],
    /// Change fingerprint.
    pub change: Fingerprint,
    /// Kind of change payload.
    pub change_kind: ChangeKind,
    /// Change payload bytes.
    pub change_data: &'a [u8],
    /// Arena indices of the item's dependencies.
    pub dependencies: &'a [u32],
}

impl<'a> ItemView<'a> {
    /// Converts the view back into an appendable item.
    pub fn as_new_item(&self) -> NewItem<'a> {
        NewItem {
            identity: self.identity,
            kind: self.kind,
            identity_data: self.identity_data,
            change: self.change,
            change_kind: self.change_kind,
            change_data: self.change_data,
        }
    }
}

/// Lengths of every column group, as recorded in the ledger header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ColumnLengths {
    pub(crate) items: usize,
    pub(crate) dependencies: usize,
    pub(crate) payload: usize,
}

/// The arena of one generation: item columns plus the identity index.
#[derive(Debug, Clone)]
pub struct ItemStore {
    identities: Vec<Fingerprint>,
    changes: Vec<Fingerprint>,
    kinds: Vec<u16>,
    change_kinds: Vec<u16>,
    dep_starts: Vec<u32>,
    dep_counts: Vec<u32>,
    identity_offsets: Vec<u32>,
    identity_sizes: Vec<u32>,
    change_offsets: Vec<u32>,
    change_sizes: Vec<u32>,
    dependencies: Vec<u32>,
    payload: Vec<u8>,
    index: ShardIndex,
}

impl ItemStore {
    /// Creates an empty store with reserved room for the given counts.
    pub fn with_capacity(
        items: usize,
        dependencies: usize,
        payload: usize,
        shard_bits: u32,
        shard_capacity: u32,
    ) -> Self {
        Self {
            identities: Vec::with_capacity(items),
            changes: Vec::with_capacity(items),
            kinds: Vec::with_capacity(items),
            change_kinds: Vec::with_capacity(items),
            dep_starts: Vec::with_capacity(items),
            dep_counts: Vec::with_capacity(items),
            identity_offsets: Vec::with_capacity(items),
            identity_sizes: Vec::with_capacity(items),
            change_offsets: Vec::with_capacity(items),
            change_sizes: Vec::with_capacity(items),
            dependencies: Vec::with_capacity(dependencies),
            payload: Vec::with_capacity(payload),
            index: ShardIndex::new(shard_bits, shard_capacity),
        }
    }

    /// Number of stored items.
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Returns `true` if the store holds no items.
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Number of entries in the flat dependency array.
    pub fn dependency_links(&self) -> usize {
        self.dependencies.len()
    }

    /// Size of the payload pool in bytes.
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// The identity index.
    pub fn index(&self) -> &ShardIndex {
        &self.index
    }

    /// Appends an item and its dependencies.
    ///
    /// Dependencies already present are shared; absent ones are appended as
    /// items without dependencies of their own. Appending an identity that
    /// already exists is an error, so callers check existence first.
    pub fn append(&mut self, item: &NewItem<'_>, deps: &[NewItem<'_>]) -> Result<u32, LedgerError> {
        if self.find(&item.identity).is_some() || deps.iter().any(|d| d.identity == item.identity) {
            return Err(LedgerError::DuplicateItem {
                identity: item.identity,
            });
        }
        let mut dep_indices = Vec::with_capacity(deps.len());
        for dep in deps {
            let index = match self.find(&dep.identity) {
                Some(index) => index,
                None => self.push(dep, &[])?,
            };
            dep_indices.push(index);
        }
        self.push(item, &dep_indices)
    }

    /// Returns a view of item `index` without copying payload bytes.
    pub fn get(&self, index: u32) -> Option<ItemView<'_>> {
        let i = index as usize;
        if i >= self.len() {
            return None;
        }
        let dep_start = self.dep_starts[i] as usize;
        let dep_end = dep_start + self.dep_counts[i] as usize;
        Some(ItemView {
            index,
            identity: self.identities[i],
            kind: ItemKind::from_bits(self.kinds[i])?,
            identity_data: pool_slice(
                &self.payload,
                self.identity_offsets[i],
                self.identity_sizes[i],
            ),
            change: self.changes[i],
            change_kind: ChangeKind::from_bits(self.change_kinds[i])?,
            change_data: pool_slice(&self.payload, self.change_offsets[i], self.change_sizes[i]),
            dependencies: &self.dependencies[dep_start..dep_end],
        })
    }

    /// Finds an item by identity, sorting its shard if needed.
    pub fn find(&mut self, identity: &Fingerprint) -> Option<u32> {
        self.index.lookup(identity, &self.identities)
    }

    /// Finds an item by identity through a shared reference.
    pub fn find_readonly(&self, identity: &Fingerprint) -> Option<u32> {
        self.index.lookup_readonly(identity, &self.identities)
    }

    /// Returns `true` if an item with this identity exists.
    pub fn does_item_exist(&mut self, identity: &Fingerprint) -> bool {
        self.find(identity).is_some()
    }

    /// Sorts every dirty shard.
    pub fn seal(&mut self) {
        self.index.sort_all(&self.identities);
    }

    fn push(&mut self, item: &NewItem<'_>, dep_indices: &[u32]) -> Result<u32, LedgerError> {
        let index = to_u32(self.len(), "items")?;
        let dep_start = to_u32(self.dependencies.len(), "dependency links")?;
        let dep_count = to_u32(dep_indices.len(), "dependency links")?;
        let (identity_offset, identity_size) = self.push_payload(item.identity_data)?;
        let (change_offset, change_size) = self.push_payload(item.change_data)?;

        self.identities.push(item.identity);
        self.changes.push(item.change);
        self.kinds.push(item.kind as u16);
        self.change_kinds.push(item.change_kind as u16);
        self.dep_starts.push(dep_start);
        self.dep_counts.push(dep_count);
        self.identity_offsets.push(identity_offset);
        self.identity_sizes.push(identity_size);
        self.change_offsets.push(change_offset);
        self.change_sizes.push(change_size);
        self.dependencies.extend_from_slice(dep_indices);
        self.index.insert(&item.identity, index);
        Ok(index)
    }

    fn push_payload(&mut self, bytes: &[u8]) -> Result<(u32, u32), LedgerError> {
        let offset = to_u32(self.payload.len(), "payload bytes")?;
        let size = to_u32(bytes.len(), "payload bytes")?;
        to_u32(self.payload.len() + bytes.len(), "payload bytes")?;
        self.payload.extend_from_slice(bytes);
        Ok((offset, size))
    }

    pub(crate) fn column_lengths(&self) -> ColumnLengths {
        ColumnLengths {
            items: self.len(),
            dependencies: self.dependencies.len(),
            payload: self.payload.len(),
        }
    }

    pub(crate) fn encode(&self, w: &mut ByteWriter) {
        w.put_fingerprint_column(&self.identities);
        w.put_fingerprint_column(&self.changes);
        w.put_u16_column(&self.kinds);
        w.put_u16_column(&self.change_kinds);
        w.put_u32_column(&self.dep_starts);
        w.put_u32_column(&self.dep_counts);
        w.put_u32_column(&self.identity_offsets);
        w.put_u32_column(&self.identity_sizes);
        w.put_u32_column(&self.change_offsets);
        w.put_u32_column(&self.change_sizes);
        w.put_u32_column(&self.dependencies);
        w.put_bytes(&self.payload);
        self.index.encode(w);
    }

    pub(crate) fn decode(
        r: &mut ByteReader<'_>,
        lengths: ColumnLengths,
        shard_bits: u32,
        shard_capacity: u32,
        shard_array_len: usize,
    ) -> Result<Self, DecodeError> {
        let n = lengths.items;
        let identities = r.fingerprint_column(n)?;
        let changes = r.fingerprint_column(n)?;
        let kinds = r.u16_column(n)?;
        let change_kinds = r.u16_column(n)?;
        let dep_starts = r.u32_column(n)?;
        let dep_counts = r.u32_column(n)?;
        let identity_offsets = r.u32_column(n)?;
        let identity_sizes = r.u32_column(n)?;
        let change_offsets = r.u32_column(n)?;
        let change_sizes = r.u32_column(n)?;
        let dependencies = r.u32_column(lengths.dependencies)?;
        let payload = r.take(lengths.payload)?.to_vec();

        for i in 0..n {
            if ItemKind::from_bits(kinds[i]).is_none() {
                return Err(inconsistent(i, "unknown identity kind"));
            }
            if ChangeKind::from_bits(change_kinds[i]).is_none() {
                return Err(inconsistent(i, "unknown change kind"));
            }
            check_range(dep_starts[i], dep_counts[i], dependencies.len())
                .ok_or_else(|| inconsistent(i, "dependency range out of bounds"))?;
            check_range(identity_offsets[i], identity_sizes[i], payload.len())
                .ok_or_else(|| inconsistent(i, "identity payload out of bounds"))?;
            check_range(change_offsets[i], change_sizes[i], payload.len())
                .ok_or_else(|| inconsistent(i, "change payload out of bounds"))?;
        }
        if let Some(bad) = dependencies.iter().find(|&&d| d as usize >= n) {
            return Err(DecodeError::Inconsistent(format!(
                "dependency index {bad} out of range"
            )));
        }

        let index =
            ShardIndex::decode(r, shard_bits, shard_capacity, shard_array_len, &identities)?;

        Ok(Self {
            identities,
            changes,
            kinds,
            change_kinds,
            dep_starts,
            dep_counts,
            identity_offsets,
            identity_sizes,
            change_offsets,
            change_sizes,
            dependencies,
            payload,
            index,
        })
    }
}

fn pool_slice(pool: &[u8], offset: u32, size: u32) -> &[u8] {
    &pool[offset as usize..offset as usize + size as usize]
}

fn check_range(start: u32, count: u32, len: usize) -> Option<()> {
    (start as usize)
        .checked_add(count as usize)
        .filter(|&end| end <= len)
        .map(|_| ())
}

fn inconsistent(item: usize, what: &str) -> DecodeError {
    DecodeError::Inconsistent(format!("item {item}: {what}"))
}

fn to_u32(value: usize, what: &'static str) -> Result<u32, LedgerError> {
    u32::try_from(value).map_err(|_| LedgerError::CapacityExceeded { what })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, kind: ItemKind, mtime: u64) -> (Fingerprint, Vec<u8>) {
        let prefix: &[u8] = if kind == ItemKind::Dependency { b"dep" } else { b"" };
        (Fingerprint::digest(prefix, path.as_bytes()), mtime.to_le_bytes().to_vec())
    }

    fn store() -> ItemStore {
        ItemStore::with_capacity(16, 16, 256, 4, 8)
    }

    fn plain_item(prefix: &[u8], path: &'static [u8], kind: ItemKind) -> NewItem<'static> {
        NewItem::new(Fingerprint::digest(prefix, path), kind, path, ChangeKind::None, &[])
    }

    #[test]
    fn append_and_get() {
        let mut s = store();
        let (id, change) = file("/src/a.o", ItemKind::SourceFile, 7);
        let item = NewItem::new(
            id,
            ItemKind::SourceFile,
            b"/src/a.o",
            ChangeKind::Timestamp,
            &change,
        );
        let index = s.append(&item, &[]).unwrap();

        let view = s.get(index).unwrap();
        assert_eq!(view.identity, id);
        assert_eq!(view.kind, ItemKind::SourceFile);
        assert_eq!(view.identity_data, b"/src/a.o");
        assert_eq!(view.change_kind, ChangeKind::Timestamp);
        assert_eq!(view.change_data, &7u64.to_le_bytes());
        assert_eq!(view.change, change_fingerprint(ChangeKind::Timestamp, &change));
        assert!(view.dependencies.is_empty());
    }

    #[test]
    fn dependencies_are_appended_and_shared() {
        let mut s = store();
        let (h_id, h_change) = file("/src/common.h", ItemKind::Dependency, 100);
        let header = NewItem::new(
            h_id,
            ItemKind::Dependency,
            b"/src/common.h",
            ChangeKind::Timestamp,
            &h_change,
        );

        let a = plain_item(b"", b"/obj/a.o", ItemKind::SourceFile);
        let b = plain_item(b"", b"/obj/b.o", ItemKind::SourceFile);
        let ia = s.append(&a, &[header]).unwrap();
        let ib = s.append(&b, &[header]).unwrap();

        // header + a + b, header stored once.
        assert_eq!(s.len(), 3);
        let da = s.get(ia).unwrap().dependencies.to_vec();
        let db = s.get(ib).unwrap().dependencies.to_vec();
        assert_eq!(da, db);
        assert_eq!(s.get(da[0]).unwrap().identity, h_id);
        assert_eq!(s.dependency_links(), 2);
    }

    #[test]
    fn duplicate_identity_is_rejected() {
        let mut s = store();
        let id = Fingerprint::digest(b"", b"/obj/a.o");
        let item = NewItem::new(id, ItemKind::SourceFile, b"/obj/a.o", ChangeKind::None, &[]);
        s.append(&item, &[]).unwrap();
        let err = s.append(&item, &[]).unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateItem { identity } if identity == id));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn self_dependency_is_rejected() {
        let mut s = store();
        let id = Fingerprint::digest(b"", b"/obj/a.o");
        let item = NewItem::new(id, ItemKind::SourceFile, b"/obj/a.o", ChangeKind::None, &[]);
        assert!(s.append(&item, &[item]).is_err());
        assert!(s.is_empty());
    }

    #[test]
    fn get_out_of_range_is_none() {
        let s = store();
        assert!(s.get(0).is_none());
    }

    #[test]
    fn find_and_exist() {
        let mut s = store();
        let id = Fingerprint::digest(b"", b"/obj/a.o");
        assert!(!s.does_item_exist(&id));
        let item = NewItem::new(id, ItemKind::SourceFile, b"/obj/a.o", ChangeKind::None, &[]);
        let index = s.append(&item, &[]).unwrap();
        assert_eq!(s.find(&id), Some(index));
        s.seal();
        assert_eq!(s.find_readonly(&id), Some(index));
    }

    #[test]
    fn encode_decode_roundtrip() {
        let mut s = store();
        let (h_id, h_change) = file("/src/a.h", ItemKind::Dependency, 100);
        let header = NewItem::new(
            h_id,
            ItemKind::Dependency,
            b"/src/a.h",
            ChangeKind::Timestamp,
            &h_change,
        );
        let main_id = Fingerprint::digest(b"", b"/obj/a.o");
        let main = NewItem::new(
            main_id,
            ItemKind::SourceFile,
            b"/obj/a.o",
            ChangeKind::Blob,
            b"flags",
        );
        s.append(&main, &[header]).unwrap();

        let mut w = ByteWriter::default();
        s.encode(&mut w);
        let bytes = w.into_inner();
        let mut r = ByteReader::new(&bytes);
        let mut back = ItemStore::decode(&mut r, s.column_lengths(), 4, 8, s.len()).unwrap();
        assert_eq!(r.remaining(), 0);

        let index = back.find(&main_id).unwrap();
        let view = back.get(index).unwrap();
        assert_eq!(view.change_data, b"flags");
        assert_eq!(view.change_kind, ChangeKind::Blob);
        let dep = back.get(view.dependencies[0]).unwrap();
        assert_eq!(dep.identity_data, b"/src/a.h");
    }

    #[test]
    fn decode_rejects_dangling_dependency() {
        let mut s = store();
        let main = plain_item(b"", b"/obj/a.o", ItemKind::SourceFile);
        let dep = plain_item(b"dep", b"/a.h", ItemKind::Dependency);
        s.append(&main, &[dep]).unwrap();
        s.dependencies[0] = 99;

        let mut w = ByteWriter::default();
        s.encode(&mut w);
        let bytes = w.into_inner();
        let mut r = ByteReader::new(&bytes);
        assert!(ItemStore::decode(&mut r, s.column_lengths(), 4, 8, s.len()).is_err());
    }
}
