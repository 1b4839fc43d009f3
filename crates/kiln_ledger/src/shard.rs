//! Hash-sharded, lazily sorted index over identity fingerprints.
//!
//! The top `bits` bits of a fingerprint select one of `2^bits` shards. Each
//! shard is a run of item indices. Inserting appends to the run and marks the
//! shard dirty; the first lookup that touches a dirty shard sorts it by the
//! referenced fingerprints, after which lookups binary-search.
//!
//! Shards grow past their configured capacity instead of overflowing; the
//! capacity is only the reservation made on a shard's first insert, so
//! empty shards cost nothing.

use kiln_common::Fingerprint;

use crate::codec::{ByteReader, ByteWriter, DecodeError};

/// The identity index of one generation.
#[derive(Debug, Clone)]
pub struct ShardIndex {
    bits: u32,
    capacity: u32,
    shards: Vec<Vec<u32>>,
    dirty: Vec<bool>,
    len: usize,
}

impl ShardIndex {
    /// Creates an empty index with `2^bits` shards.
    ///
    /// A shard reserves `capacity` slots when it receives its first item.
    pub fn new(bits: u32, capacity: u32) -> Self {
        let count = 1usize << bits;
        Self {
            bits,
            capacity,
            shards: vec![Vec::new(); count],
            dirty: vec![false; count],
            len: 0,
        }
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Total number of indexed items.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if nothing has been indexed.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Item indices currently held by each shard.
    pub fn shards(&self) -> impl Iterator<Item = &[u32]> {
        self.shards.iter().map(Vec::as_slice)
    }

    /// Returns `true` if the shard for `fingerprint` has unsorted inserts.
    pub fn is_dirty(&self, fingerprint: &Fingerprint) -> bool {
        self.dirty[fingerprint.shard_of(self.bits)]
    }

    /// Records that item `index` has identity `fingerprint`.
    ///
    /// Duplicate detection is the store's job; the index accepts whatever
    /// it is given.
    pub fn insert(&mut self, fingerprint: &Fingerprint, index: u32) {
        let shard = fingerprint.shard_of(self.bits);
        let run = &mut self.shards[shard];
        if run.capacity() == 0 {
            run.reserve(self.capacity as usize);
        }
        run.push(index);
        self.dirty[shard] = true;
        self.len += 1;
    }

    /// Finds the item index for `fingerprint`, sorting its shard first if dirty.
    pub fn lookup(
        &mut self,
        fingerprint: &Fingerprint,
        identities: &[Fingerprint],
    ) -> Option<u32> {
        let shard = fingerprint.shard_of(self.bits);
        if self.dirty[shard] {
            sort_shard(&mut self.shards[shard], identities);
            self.dirty[shard] = false;
        }
        search_sorted(&self.shards[shard], fingerprint, identities)
    }

    /// Finds the item index for `fingerprint` without mutating the index.
    ///
    /// Clean shards are binary-searched; a dirty shard is scanned linearly.
    pub fn lookup_readonly(
        &self,
        fingerprint: &Fingerprint,
        identities: &[Fingerprint],
    ) -> Option<u32> {
        let shard = fingerprint.shard_of(self.bits);
        let run = &self.shards[shard];
        if self.dirty[shard] {
            run.iter()
                .copied()
                .find(|&i| identities[i as usize] == *fingerprint)
        } else {
            search_sorted(run, fingerprint, identities)
        }
    }

    /// Sorts every dirty shard so all later lookups can go through `&self`.
    pub fn sort_all(&mut self, identities: &[Fingerprint]) {
        for (run, dirty) in self.shards.iter_mut().zip(self.dirty.iter_mut()) {
            if *dirty {
                sort_shard(run, identities);
                *dirty = false;
            }
        }
    }

    /// Writes offsets, sizes, dirty bits and the flat contents array.
    pub(crate) fn encode(&self, w: &mut ByteWriter) {
        let mut offset = 0u32;
        let mut offsets = Vec::with_capacity(self.shards.len());
        let mut sizes = Vec::with_capacity(self.shards.len());
        for run in &self.shards {
            offsets.push(offset);
            sizes.push(run.len() as u32);
            offset += run.len() as u32;
        }
        w.put_u32_column(&offsets);
        w.put_u32_column(&sizes);
        let dirty: Vec<u8> = self.dirty.iter().map(|&d| u8::from(d)).collect();
        w.put_bytes(&dirty);
        for run in &self.shards {
            w.put_u32_column(run);
        }
    }

    /// Reads an index written by [`ShardIndex::encode`] and checks that it
    /// holds every item of `identities` exactly once, each in its own shard.
    pub(crate) fn decode(
        r: &mut ByteReader<'_>,
        bits: u32,
        capacity: u32,
        array_len: usize,
        identities: &[Fingerprint],
    ) -> Result<Self, DecodeError> {
        let count = 1usize << bits;
        let offsets = r.u32_column(count)?;
        let sizes = r.u32_column(count)?;
        let dirty_bytes = r.take(count)?;
        let contents = r.u32_column(array_len)?;

        if array_len != identities.len() {
            return Err(DecodeError::Inconsistent(format!(
                "shard index holds {array_len} entries for {} items",
                identities.len()
            )));
        }

        let mut seen = vec![false; identities.len()];
        let mut shards = Vec::with_capacity(count);
        for (shard, (&offset, &size)) in offsets.iter().zip(&sizes).enumerate() {
            let start = offset as usize;
            let end = start
                .checked_add(size as usize)
                .filter(|&end| end <= contents.len())
                .ok_or_else(|| {
                    DecodeError::Inconsistent(format!("shard {shard} runs past the contents array"))
                })?;
            let run = contents[start..end].to_vec();
            for &index in &run {
                let slot = seen.get_mut(index as usize).ok_or_else(|| {
                    DecodeError::Inconsistent(format!("shard entry {index} out of range"))
                })?;
                if *slot || identities[index as usize].shard_of(bits) != shard {
                    return Err(DecodeError::Inconsistent(format!(
                        "item {index} misplaced in shard {shard}"
                    )));
                }
                *slot = true;
            }
            shards.push(run);
        }
        if seen.iter().any(|&s| !s) {
            return Err(DecodeError::Inconsistent(
                "shard index is missing items".to_string(),
            ));
        }

        Ok(Self {
            bits,
            capacity,
            shards,
            dirty: dirty_bytes.iter().map(|&b| b != 0).collect(),
            len: array_len,
        })
    }
}

fn sort_shard(run: &mut [u32], identities: &[Fingerprint]) {
    run.sort_unstable_by(|a, b| identities[*a as usize].cmp(&identities[*b as usize]));
}

fn search_sorted(
    run: &[u32],
    fingerprint: &Fingerprint,
    identities: &[Fingerprint],
) -> Option<u32> {
    run.binary_search_by(|i| identities[*i as usize].cmp(fingerprint))
        .ok()
        .map(|pos| run[pos])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    fn random_fingerprints(n: usize, seed: u64) -> Vec<Fingerprint> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| Fingerprint::from_raw(rng.gen()))
            .collect()
    }

    fn build(fps: &[Fingerprint], bits: u32, capacity: u32) -> ShardIndex {
        let mut index = ShardIndex::new(bits, capacity);
        for (i, fp) in fps.iter().enumerate() {
            index.insert(fp, i as u32);
        }
        index
    }

    #[test]
    fn new_index_has_power_of_two_shards() {
        let index = ShardIndex::new(10, 512);
        assert_eq!(index.shard_count(), 1024);
        assert!(index.is_empty());
    }

    #[test]
    fn shards_reserve_on_first_insert() {
        let fps = random_fingerprints(1, 7);
        let mut index = ShardIndex::new(16, 512);
        assert!(index.shards.iter().all(|run| run.capacity() == 0));

        index.insert(&fps[0], 0);
        let shard = fps[0].shard_of(16);
        assert!(index.shards[shard].capacity() >= 512);
        assert_eq!(index.shards.iter().filter(|run| run.capacity() > 0).count(), 1);
    }

    #[test]
    fn every_inserted_item_is_found() {
        let fps = random_fingerprints(5000, 1);
        let mut index = build(&fps, 10, 512);
        for (i, fp) in fps.iter().enumerate() {
            assert_eq!(index.lookup(fp, &fps), Some(i as u32));
        }
    }

    #[test]
    fn never_inserted_is_not_found() {
        let fps = random_fingerprints(2000, 2);
        let mut index = build(&fps, 8, 16);
        for stranger in random_fingerprints(200, 99) {
            assert_eq!(index.lookup(&stranger, &fps), None);
            assert_eq!(index.lookup_readonly(&stranger, &fps), None);
        }
    }

    #[test]
    fn lookup_sorts_dirty_shard() {
        let fps = random_fingerprints(64, 3);
        let mut index = build(&fps, 2, 4);
        assert!(index.is_dirty(&fps[0]));
        index.lookup(&fps[0], &fps);
        assert!(!index.is_dirty(&fps[0]));

        let shard = fps[0].shard_of(2);
        let run = index.shards().nth(shard).unwrap();
        assert!(run
            .windows(2)
            .all(|w| fps[w[0] as usize] < fps[w[1] as usize]));
    }

    #[test]
    fn insert_after_sort_redirties() {
        let fps = random_fingerprints(300, 4);
        let mut index = build(&fps[..200], 4, 8);
        index.sort_all(&fps);
        for (i, fp) in fps.iter().enumerate().skip(200) {
            index.insert(fp, i as u32);
        }
        for (i, fp) in fps.iter().enumerate() {
            assert_eq!(index.lookup_readonly(fp, &fps), Some(i as u32));
            assert_eq!(index.lookup(fp, &fps), Some(i as u32));
        }
    }

    #[test]
    fn shards_grow_past_capacity() {
        // One bit, capacity 2: thousands of items must still fit.
        let fps = random_fingerprints(4000, 5);
        let mut index = build(&fps, 1, 2);
        assert_eq!(index.len(), 4000);
        for (i, fp) in fps.iter().enumerate() {
            assert_eq!(index.lookup(fp, &fps), Some(i as u32));
        }
    }

    #[test]
    fn encode_decode_preserves_lookups() {
        let fps = random_fingerprints(700, 6);
        let mut index = build(&fps, 6, 8);
        index.lookup(&fps[3], &fps);

        let mut w = ByteWriter::default();
        index.encode(&mut w);
        let bytes = w.into_inner();
        let mut r = ByteReader::new(&bytes);
        let mut back = ShardIndex::decode(&mut r, 6, 8, fps.len(), &fps).unwrap();
        assert_eq!(r.remaining(), 0);
        assert!(!back.is_dirty(&fps[3]));
        for (i, fp) in fps.iter().enumerate() {
            assert_eq!(back.lookup(fp, &fps), Some(i as u32));
        }
    }

    #[test]
    fn decode_rejects_missing_items() {
        let fps = random_fingerprints(10, 7);
        let index = build(&fps[..9], 2, 4);
        let mut w = ByteWriter::default();
        index.encode(&mut w);
        let bytes = w.into_inner();
        let mut r = ByteReader::new(&bytes);
        assert!(ShardIndex::decode(&mut r, 2, 4, 9, &fps).is_err());
    }

    #[test]
    fn decode_rejects_misplaced_items() {
        let fps = random_fingerprints(50, 8);
        let index = build(&fps, 3, 4);
        let mut w = ByteWriter::default();
        index.encode(&mut w);
        let bytes = w.into_inner();
        let mut r = ByteReader::new(&bytes);
        // Decoding with a different bit count puts entries in the wrong shards.
        assert!(ShardIndex::decode(&mut r, 2, 4, fps.len(), &fps).is_err());
    }
}
