use std::collections::BTreeMap;
use std::ops::Bound;

use crate::core::error::{Error, Result};
use crate::core::types::IndexId;
use crate::index::key::{extract_key, KeyPart};
use crate::storage::headers::{HeaderId, MasterPointers};

/// Ordered index over one or more attribute paths: the same unique/sparse
/// axes as the hash index plus range scans in key order. Mutation happens
/// under the exclusive collection lock, so the ordered map needs no internal
/// synchronization.
#[derive(Debug)]
pub struct SkiplistIndex {
    id: IndexId,
    fields: Vec<String>,
    unique: bool,
    sparse: bool,
    tree: BTreeMap<Vec<KeyPart>, Vec<HeaderId>>,
    entries: usize,
}

impl SkiplistIndex {
    pub fn new(id: IndexId, fields: Vec<String>, unique: bool, sparse: bool) -> SkiplistIndex {
        SkiplistIndex {
            id,
            fields,
            unique,
            sparse,
            tree: BTreeMap::new(),
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
            .ok_or_else(|| Error::Internal("skiplist index fed an unallocated header".into()))?;
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
        let bucket = self.tree.entry(key).or_default();
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
        if let Some(bucket) = self.tree.get_mut(&key) {
            let before = bucket.len();
            bucket.retain(|id| *id != header_id);
            self.entries -= before - bucket.len();
            if bucket.is_empty() {
                self.tree.remove(&key);
            }
        }
        Ok(())
    }

    pub fn batch_insert(
        &mut self,
        pool: &MasterPointers,
        header_ids: &[HeaderId],
        _threads: usize,
    ) -> Result<()> {
        for &header_id in header_ids {
            self.insert(pool, header_id, false)?;
        }
        Ok(())
    }

    pub fn lookup(&self, key: &[KeyPart]) -> &[HeaderId] {
        self.tree.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Headers whose keys fall inside the given bounds, in key order.
    pub fn range_scan(
        &self,
        lower: Bound<&Vec<KeyPart>>,
        upper: Bound<&Vec<KeyPart>>,
    ) -> Vec<HeaderId> {
        self.tree
            .range::<Vec<KeyPart>, _>((lower, upper))
            .flat_map(|(_, bucket)| bucket.iter().copied())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn selectivity_estimate(&self) -> f64 {
        if self.unique || self.entries == 0 {
            return 1.0;
        }
        self.tree.len() as f64 / self.entries as f64
    }

    pub fn memory(&self) -> usize {
        self.tree.len() * std::mem::size_of::<(Vec<KeyPart>, Vec<HeaderId>)>()
            + self.entries * std::mem::size_of::<HeaderId>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Fid, Tick};
    use crate::storage::headers::Header;
    use serde_json::json;
    use std::sync::Arc;

    fn put(pool: &mut MasterPointers, key: &str, age: i64) -> HeaderId {
        pool.request(Header {
            fid: Fid(1),
            revision: Tick(1),
            key_hash: 0,
            marker_size: 64,
            data: Arc::new(json!({ "_key": key, "age": age })),
        })
        .unwrap()
    }

    #[test]
    fn range_scan_returns_ordered_matches() {
        let mut pool = MasterPointers::new();
        let mut index = SkiplistIndex::new(IndexId(3), vec!["age".into()], false, false);

        let ids: Vec<(HeaderId, i64)> = [40, 10, 30, 20]
            .iter()
            .map(|&age| (put(&mut pool, &format!("k{age}"), age), age))
            .collect();
        for (id, _) in &ids {
            index.insert(&pool, *id, false).unwrap();
        }

        let lower = vec![KeyPart::Number(15.0)];
        let upper = vec![KeyPart::Number(35.0)];
        let hits = index.range_scan(Bound::Included(&lower), Bound::Included(&upper));

        let expected: Vec<HeaderId> = [20, 30]
            .iter()
            .map(|&age| ids.iter().find(|(_, a)| *a == age).unwrap().0)
            .collect();
        assert_eq!(hits, expected);
    }

    #[test]
    fn unique_skiplist_rejects_collisions() {
        let mut pool = MasterPointers::new();
        let mut index = SkiplistIndex::new(IndexId(3), vec!["age".into()], true, false);

        let a = put(&mut pool, "a", 7);
        let b = put(&mut pool, "b", 7);
        index.insert(&pool, a, false).unwrap();
        assert!(matches!(
            index.insert(&pool, b, false),
            Err(Error::UniqueConstraintViolated)
        ));
    }
}
