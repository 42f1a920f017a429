use std::collections::HashMap;

use crate::core::error::{Error, Result};
use crate::core::types::{IndexId, ATTR_FROM, ATTR_TO};
use crate::storage::headers::{HeaderId, MasterPointers};

/// Edge index: multimaps from `_from` and `_to` vertex ids to all edges
/// touching that vertex. Slot 1 of the index list on edge collections.
#[derive(Debug)]
pub struct EdgeIndex {
    id: IndexId,
    from: HashMap<String, Vec<HeaderId>>,
    to: HashMap<String, Vec<HeaderId>>,
}

impl EdgeIndex {
    pub fn new(id: IndexId) -> EdgeIndex {
        EdgeIndex {
            id,
            from: HashMap::new(),
            to: HashMap::new(),
        }
    }

    pub fn id(&self) -> IndexId {
        self.id
    }

    fn vertex_pair(pool: &MasterPointers, header_id: HeaderId) -> Result<(String, String)> {
        let header = pool
            .get(header_id)
            .ok_or_else(|| Error::Internal("edge index fed an unallocated header".into()))?;
        let from = header
            .str_attr(ATTR_FROM)
            .ok_or(Error::InvalidEdgeAttribute)?;
        let to = header.str_attr(ATTR_TO).ok_or(Error::InvalidEdgeAttribute)?;
        Ok((from.to_string(), to.to_string()))
    }

    pub fn insert(
        &mut self,
        pool: &MasterPointers,
        header_id: HeaderId,
        is_rollback: bool,
    ) -> Result<()> {
        let (from, to) = Self::vertex_pair(pool, header_id)?;

        let from_bucket = self.from.entry(from).or_default();
        if !is_rollback || !from_bucket.contains(&header_id) {
            from_bucket.push(header_id);
        }
        let to_bucket = self.to.entry(to).or_default();
        if !is_rollback || !to_bucket.contains(&header_id) {
            to_bucket.push(header_id);
        }
        Ok(())
    }

    pub fn remove(
        &mut self,
        pool: &MasterPointers,
        header_id: HeaderId,
        _is_rollback: bool,
    ) -> Result<()> {
        let (from, to) = Self::vertex_pair(pool, header_id)?;

        if let Some(bucket) = self.from.get_mut(&from) {
            bucket.retain(|id| *id != header_id);
            if bucket.is_empty() {
                self.from.remove(&from);
            }
        }
        if let Some(bucket) = self.to.get_mut(&to) {
            bucket.retain(|id| *id != header_id);
            if bucket.is_empty() {
                self.to.remove(&to);
            }
        }
        Ok(())
    }

    /// All edges leaving `vertex`.
    pub fn lookup_from(&self, vertex: &str) -> &[HeaderId] {
        self.from.get(vertex).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All edges arriving at `vertex`.
    pub fn lookup_to(&self, vertex: &str) -> &[HeaderId] {
        self.to.get(vertex).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.from.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.from.is_empty()
    }

    pub fn selectivity_estimate(&self) -> f64 {
        let entries: usize = self.len();
        if entries == 0 {
            return 1.0;
        }
        let distinct = self.from.len() + self.to.len();
        (distinct as f64 / (entries * 2) as f64).min(1.0)
    }

    pub fn memory(&self) -> usize {
        let entry = std::mem::size_of::<HeaderId>();
        let buckets = self.from.len() + self.to.len();
        buckets * std::mem::size_of::<(String, Vec<HeaderId>)>()
            + self
                .from
                .values()
                .chain(self.to.values())
                .map(|bucket| bucket.len() * entry)
                .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Fid, Tick};
    use crate::storage::headers::Header;
    use serde_json::json;
    use std::sync::Arc;

    fn edge(pool: &mut MasterPointers, key: &str, from: &str, to: &str) -> HeaderId {
        pool.request(Header {
            fid: Fid(1),
            revision: Tick(1),
            key_hash: 0,
            marker_size: 64,
            data: Arc::new(json!({ "_key": key, "_from": from, "_to": to })),
        })
        .unwrap()
    }

    #[test]
    fn tracks_edges_in_both_directions() {
        let mut pool = MasterPointers::new();
        let mut index = EdgeIndex::new(IndexId(1));

        let e1 = edge(&mut pool, "e1", "v/1", "v/2");
        let e2 = edge(&mut pool, "e2", "v/1", "v/3");
        index.insert(&pool, e1, false).unwrap();
        index.insert(&pool, e2, false).unwrap();

        assert_eq!(index.lookup_from("v/1"), &[e1, e2]);
        assert_eq!(index.lookup_to("v/2"), &[e1]);
        assert_eq!(index.len(), 2);

        index.remove(&pool, e1, false).unwrap();
        assert_eq!(index.lookup_from("v/1"), &[e2]);
        assert!(index.lookup_to("v/2").is_empty());
    }

    #[test]
    fn rollback_reinsert_does_not_duplicate() {
        let mut pool = MasterPointers::new();
        let mut index = EdgeIndex::new(IndexId(1));

        let e1 = edge(&mut pool, "e1", "v/1", "v/2");
        index.insert(&pool, e1, false).unwrap();
        index.insert(&pool, e1, true).unwrap();
        assert_eq!(index.lookup_from("v/1"), &[e1]);
    }
}
