use crate::core::error::{Error, Result};
use crate::storage::headers::{HeaderId, MasterPointers};

/// Initial bucket count for an empty index.
const MIN_BUCKETS: usize = 16;

#[derive(Debug, Clone, Copy)]
struct Slot {
    hash: u64,
    id: HeaderId,
}

/// Position of a sequential walk over the bucket array. The walk visits
/// buckets in physical order and is stable across insertions that do not
/// resize the table.
#[derive(Debug, Clone, Copy, Default)]
pub struct BucketCursor {
    pub position: usize,
}

/// Open-addressed robin-hood hash from `_key` to header. At most one live
/// header per key.
#[derive(Debug)]
pub struct PrimaryIndex {
    buckets: Vec<Option<Slot>>,
    len: usize,
}

impl PrimaryIndex {
    /// Size the table to the next power of two holding at least 1.1x the
    /// hinted element count.
    pub fn with_capacity_hint(hint: usize) -> PrimaryIndex {
        let wanted = (hint as f64 * 1.1).ceil() as usize;
        let buckets = wanted.next_power_of_two().max(MIN_BUCKETS);
        PrimaryIndex {
            buckets: vec![None; buckets],
            len: 0,
        }
    }

    pub fn new() -> PrimaryIndex {
        PrimaryIndex::with_capacity_hint(0)
    }

    /// FNV-1a. Stable across processes: hashes are cached in headers and
    /// persisted recoveries must agree with live inserts.
    pub fn hash_key(key: &str) -> u64 {
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in key.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
        hash
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    pub fn memory(&self) -> usize {
        self.buckets.capacity() * std::mem::size_of::<Option<Slot>>()
    }

    fn mask(&self) -> usize {
        self.buckets.len() - 1
    }

    fn probe_distance(&self, hash: u64, position: usize) -> usize {
        position.wrapping_sub(hash as usize) & self.mask()
    }

    pub fn lookup_key(&self, pool: &MasterPointers, key: &str) -> Option<HeaderId> {
        let hash = Self::hash_key(key);
        let mask = self.mask();
        let mut position = hash as usize & mask;
        let mut distance = 0usize;

        loop {
            match self.buckets[position] {
                None => return None,
                Some(slot) => {
                    if self.probe_distance(slot.hash, position) < distance {
                        // Robin-hood invariant: our key cannot be further on.
                        return None;
                    }
                    if slot.hash == hash {
                        if let Some(header) = pool.get(slot.id) {
                            if header.key() == key {
                                return Some(slot.id);
                            }
                        }
                    }
                }
            }
            position = (position + 1) & mask;
            distance += 1;
        }
    }

    /// Insert a header by its key. Returns the previously stored header for
    /// the same key without modifying the table; a `Some` result is a unique
    /// violation for the caller to handle.
    pub fn insert_key(&mut self, pool: &MasterPointers, id: HeaderId) -> Result<Option<HeaderId>> {
        let header = pool
            .get(id)
            .ok_or_else(|| Error::Internal("insert of unallocated header".into()))?;
        let hash = header.key_hash;
        let key = header.key().to_string();

        if (self.len + 1) * 100 >= self.buckets.len() * 85 {
            self.grow();
        }

        let mask = self.mask();
        let mut position = hash as usize & mask;
        let mut distance = 0usize;
        let mut carrying = Slot { hash, id };
        // Equality checks only apply while we still carry the new entry.
        let mut checking = true;

        loop {
            match self.buckets[position] {
                None => {
                    self.buckets[position] = Some(carrying);
                    self.len += 1;
                    return Ok(None);
                }
                Some(existing) => {
                    if checking && existing.hash == hash {
                        if let Some(candidate) = pool.get(existing.id) {
                            if candidate.key() == key {
                                return Ok(Some(existing.id));
                            }
                        }
                    }
                    let their_distance = self.probe_distance(existing.hash, position);
                    if their_distance < distance {
                        self.buckets[position] = Some(carrying);
                        carrying = existing;
                        distance = their_distance;
                        checking = false;
                    }
                }
            }
            position = (position + 1) & mask;
            distance += 1;
        }
    }

    /// Remove the entry for `key`, compacting the probe chain behind it.
    pub fn remove_key(&mut self, pool: &MasterPointers, key: &str) -> Option<HeaderId> {
        let hash = Self::hash_key(key);
        let mask = self.mask();
        let mut position = hash as usize & mask;
        let mut distance = 0usize;

        let found = loop {
            match self.buckets[position] {
                None => return None,
                Some(slot) => {
                    if self.probe_distance(slot.hash, position) < distance {
                        return None;
                    }
                    if slot.hash == hash {
                        let matches = pool
                            .get(slot.id)
                            .map(|header| header.key() == key)
                            .unwrap_or(false);
                        if matches {
                            break slot.id;
                        }
                    }
                }
            }
            position = (position + 1) & mask;
            distance += 1;
        };

        // Backward-shift deletion keeps probe chains dense.
        self.buckets[position] = None;
        let mut hole = position;
        loop {
            let next = (hole + 1) & mask;
            match self.buckets[next] {
                Some(slot) if self.probe_distance(slot.hash, next) > 0 => {
                    self.buckets[hole] = Some(slot);
                    self.buckets[next] = None;
                    hole = next;
                }
                _ => break,
            }
        }

        self.len -= 1;
        Some(found)
    }

    /// Advance a sequential walk, returning the next live header. Counts
    /// visited entries into `total`.
    pub fn lookup_sequential(&self, cursor: &mut BucketCursor, total: &mut u64) -> Option<HeaderId> {
        while cursor.position < self.buckets.len() {
            let bucket = self.buckets[cursor.position];
            cursor.position += 1;
            if let Some(slot) = bucket {
                *total += 1;
                return Some(slot.id);
            }
        }
        None
    }

    /// Rebuild the table sized for `hint` elements.
    pub fn resize(&mut self, hint: usize) {
        let wanted = ((hint.max(self.len) as f64) * 1.1).ceil() as usize;
        let new_size = wanted.next_power_of_two().max(MIN_BUCKETS);
        self.rebuild(new_size);
    }

    fn grow(&mut self) {
        self.rebuild(self.buckets.len() * 2);
    }

    fn rebuild(&mut self, new_size: usize) {
        let old = std::mem::replace(&mut self.buckets, vec![None; new_size]);
        self.len = 0;
        for slot in old.into_iter().flatten() {
            self.reinsert(slot);
        }
    }

    /// Insert a known-unique slot without key comparisons.
    fn reinsert(&mut self, slot: Slot) {
        let mask = self.mask();
        let mut position = slot.hash as usize & mask;
        let mut distance = 0usize;
        let mut carrying = slot;

        loop {
            match self.buckets[position] {
                None => {
                    self.buckets[position] = Some(carrying);
                    self.len += 1;
                    return;
                }
                Some(existing) => {
                    let their_distance = self.probe_distance(existing.hash, position);
                    if their_distance < distance {
                        self.buckets[position] = Some(carrying);
                        carrying = existing;
                        distance = their_distance;
                    }
                }
            }
            position = (position + 1) & mask;
            distance += 1;
        }
    }
}

impl Default for PrimaryIndex {
    fn default() -> Self {
        PrimaryIndex::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Fid, Tick};
    use crate::storage::headers::Header;
    use serde_json::json;
    use std::sync::Arc;

    fn put(pool: &mut MasterPointers, key: &str) -> HeaderId {
        pool.request(Header {
            fid: Fid(1),
            revision: Tick(1),
            key_hash: PrimaryIndex::hash_key(key),
            marker_size: 32,
            data: Arc::new(json!({ "_key": key })),
        })
        .unwrap()
    }

    #[test]
    fn insert_lookup_remove() {
        let mut pool = MasterPointers::new();
        let mut index = PrimaryIndex::new();

        for i in 0..100 {
            let id = put(&mut pool, &format!("key{i}"));
            assert!(index.insert_key(&pool, id).unwrap().is_none());
        }
        assert_eq!(index.len(), 100);

        for i in 0..100 {
            assert!(index.lookup_key(&pool, &format!("key{i}")).is_some());
        }
        assert!(index.lookup_key(&pool, "missing").is_none());

        for i in (0..100).step_by(2) {
            assert!(index.remove_key(&pool, &format!("key{i}")).is_some());
        }
        assert_eq!(index.len(), 50);
        assert!(index.lookup_key(&pool, "key2").is_none());
        assert!(index.lookup_key(&pool, "key3").is_some());
        assert!(index.remove_key(&pool, "key2").is_none());
    }

    #[test]
    fn duplicate_insert_reports_existing_entry() {
        let mut pool = MasterPointers::new();
        let mut index = PrimaryIndex::new();

        let first = put(&mut pool, "dup");
        let second = put(&mut pool, "dup");
        assert!(index.insert_key(&pool, first).unwrap().is_none());

        let previous = index.insert_key(&pool, second).unwrap();
        assert_eq!(previous, Some(first));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn sequential_walk_visits_every_entry_once() {
        let mut pool = MasterPointers::new();
        let mut index = PrimaryIndex::with_capacity_hint(64);

        let mut inserted = std::collections::HashSet::new();
        for i in 0..40 {
            let id = put(&mut pool, &format!("k{i}"));
            index.insert_key(&pool, id).unwrap();
            inserted.insert(id);
        }

        let mut cursor = BucketCursor::default();
        let mut total = 0u64;
        let mut seen = std::collections::HashSet::new();
        while let Some(id) = index.lookup_sequential(&mut cursor, &mut total) {
            assert!(seen.insert(id));
        }
        assert_eq!(total, 40);
        assert_eq!(seen, inserted);
    }

    #[test]
    fn resize_preserves_lookups() {
        let mut pool = MasterPointers::new();
        let mut index = PrimaryIndex::new();

        for i in 0..500 {
            let id = put(&mut pool, &format!("k{i}"));
            index.insert_key(&pool, id).unwrap();
        }
        index.resize(2048);
        assert!(index.capacity() >= 2048);
        for i in 0..500 {
            assert!(index.lookup_key(&pool, &format!("k{i}")).is_some());
        }
    }
}
