use std::collections::HashMap;

use rayon::prelude::*;

use crate::core::error::{Error, Result};
use crate::core::types::IndexId;
use crate::index::key::{extract_key, KeyPart};
use crate::storage::headers::{HeaderId, MasterPointers};

/// Hash index over one or more attribute paths. Unique variants reject
/// colliding inserts; sparse variants skip documents missing any component.
#[derive(Debug)]
pub struct HashIndex {
    id: IndexId,
    fields: Vec<String>,
    unique: bool,
    sparse: bool,
    map: HashMap<Vec<KeyPart>, Vec<HeaderId>>,
    entries: usize,
}

impl HashIndex {
    pub fn new(id: IndexId, fields: Vec<String>, unique: bool, sparse: bool) -> HashIndex {
        HashIndex {
            id,
            fields,
            unique,
            sparse,
            map: HashMap::new(),
            entries: 0,
        }
    }

    pub fn id(&self) -> IndexId {
        self.id
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn unique(&self) -> bool {
        self.unique
    }

    pub fn sparse(&self) -> bool {
        self.sparse
    }

    fn key_for(&self, pool: &MasterPointers, header_id: HeaderId) -> Result<Option<Vec<KeyPart>>> {
        let header = pool
            .get(header_id)
            .ok_or_else(|| Error::Internal("hash index fed an unallocated header".into()))?;
        Ok(extract_key(&header.data, &self.fields, self.sparse))
    }

    pub fn insert(
        &mut self,
        pool: &MasterPointers,
        header_id: HeaderId,
        is_rollback: bool,
    ) -> Result<()> {
        let Some(key) = self.key_for(pool, header_id)? else {
            return Ok(());
        };
        self.insert_extracted(key, header_id, is_rollback)
    }

    fn insert_extracted(
        &mut self,
        key: Vec<KeyPart>,
        header_id: HeaderId,
        is_rollback: bool,
    ) -> Result<()> {
        let bucket = self.map.entry(key).or_default();
        if self.unique && !bucket.is_empty() && !bucket.contains(&header_id) {
            return Err(Error::UniqueConstraintViolated);
        }
        if !is_rollback || !bucket.contains(&header_id) {
            bucket.push(header_id);
            self.entries += 1;
        }
        Ok(())
    }

    pub fn remove(
        &mut self,
        pool: &MasterPointers,
        header_id: HeaderId,
        _is_rollback: bool,
    ) -> Result<()> {
        let Some(key) = self.key_for(pool, header_id)? else {
            return Ok(());
        };
        if let Some(bucket) = self.map.get_mut(&key) {
            let before = bucket.len();
            bucket.retain(|id| *id != header_id);
            self.entries -= before - bucket.len();
            if bucket.is_empty() {
                self.map.remove(&key);
            }
        }
        Ok(())
    }

    /// Bulk-load a block of headers: keys are extracted in parallel, the
    /// merge stays sequential because unique checks need the whole table.
    pub fn batch_insert(
        &mut self,
        pool: &MasterPointers,
        header_ids: &[HeaderId],
        _threads: usize,
    ) -> Result<()> {
        let extracted: Vec<Result<Option<(Vec<KeyPart>, HeaderId)>>> = header_ids
            .par_iter()
            .map(|&header_id| {
                self.key_for(pool, header_id)
                    .map(|key| key.map(|key| (key, header_id)))
            })
            .collect();

        for item in extracted {
            if let Some((key, header_id)) = item? {
                self.insert_extracted(key, header_id, false)?;
            }
        }
        Ok(())
    }

    pub fn lookup(&self, key: &[KeyPart]) -> &[HeaderId] {
        self.map.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn size_hint(&mut self, expected: usize) {
        self.map.reserve(expected.saturating_sub(self.map.len()));
    }

    pub fn selectivity_estimate(&self) -> f64 {
        if self.unique {
            return 1.0;
        }
        if self.entries == 0 {
            return 1.0;
        }
        self.map.len() as f64 / self.entries as f64
    }

    pub fn memory(&self) -> usize {
        self.map.len() * std::mem::size_of::<(Vec<KeyPart>, Vec<HeaderId>)>()
            + self.entries * std::mem::size_of::<HeaderId>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Fid, Tick};
    use crate::storage::headers::Header;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn put(pool: &mut MasterPointers, value: Value) -> HeaderId {
        pool.request(Header {
            fid: Fid(1),
            revision: Tick(1),
            key_hash: 0,
            marker_size: 64,
            data: Arc::new(value),
        })
        .unwrap()
    }

    #[test]
    fn unique_index_rejects_collisions() {
        let mut pool = MasterPointers::new();
        let mut index = HashIndex::new(IndexId(2), vec!["email".into()], true, false);

        let a = put(&mut pool, json!({ "_key": "a", "email": "x@y" }));
        let b = put(&mut pool, json!({ "_key": "b", "email": "x@y" }));

        index.insert(&pool, a, false).unwrap();
        assert!(matches!(
            index.insert(&pool, b, false),
            Err(Error::UniqueConstraintViolated)
        ));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn sparse_index_skips_incomplete_documents() {
        let mut pool = MasterPointers::new();
        let mut index = HashIndex::new(IndexId(2), vec!["a".into(), "b".into()], false, true);

        let full = put(&mut pool, json!({ "_key": "f", "a": 1, "b": 2 }));
        let partial = put(&mut pool, json!({ "_key": "p", "a": 1 }));

        index.insert(&pool, full, false).unwrap();
        index.insert(&pool, partial, false).unwrap();
        assert_eq!(index.len(), 1);

        // Removing the skipped document is a no-op.
        index.remove(&pool, partial, false).unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn batch_insert_detects_unique_violations() {
        let mut pool = MasterPointers::new();
        let mut index = HashIndex::new(IndexId(2), vec!["n".into()], true, false);

        let ids: Vec<HeaderId> = (0..10)
            .map(|i| put(&mut pool, json!({ "_key": format!("k{i}"), "n": i })))
            .collect();
        index.batch_insert(&pool, &ids, 2).unwrap();
        assert_eq!(index.len(), 10);

        let clash = put(&mut pool, json!({ "_key": "clash", "n": 5 }));
        assert!(index.batch_insert(&pool, &[clash], 2).is_err());
    }

    #[test]
    fn non_unique_lookup_returns_all_matches() {
        let mut pool = MasterPointers::new();
        let mut index = HashIndex::new(IndexId(2), vec!["city".into()], false, false);

        let a = put(&mut pool, json!({ "_key": "a", "city": "rome" }));
        let b = put(&mut pool, json!({ "_key": "b", "city": "rome" }));
        index.insert(&pool, a, false).unwrap();
        index.insert(&pool, b, false).unwrap();

        let key = vec![KeyPart::String("rome".into())];
        assert_eq!(index.lookup(&key), &[a, b]);
        assert!(index.selectivity_estimate() < 1.0);
    }
}
