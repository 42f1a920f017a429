use std::sync::Arc;

use serde_json::Value;

use crate::core::error::{Error, Result};
use crate::core::types::{Fid, Tick, ATTR_KEY};

/// Stable handle into the master-pointer pool. Indexes store these instead
/// of pointers; a handle stays valid while the document is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HeaderId(pub usize);

/// In-memory descriptor of one live document version.
#[derive(Debug, Clone)]
pub struct Header {
    /// File the current marker lives in.
    pub fid: Fid,
    /// Revision id of the current version.
    pub revision: Tick,
    /// Cached hash of `_key`, matching the primary index's hash function.
    pub key_hash: u64,
    /// Aligned on-disk size of the current marker, for statistics.
    pub marker_size: u32,
    /// Parsed document payload.
    pub data: Arc<Value>,
}

impl Header {
    pub fn key(&self) -> &str {
        // Every header is built from a payload that carried `_key`.
        match self.data.get(ATTR_KEY) {
            Some(Value::String(key)) => key,
            _ => {
                debug_assert!(false, "header payload without _key");
                ""
            }
        }
    }

    pub fn str_attr(&self, name: &str) -> Option<&str> {
        self.data.get(name).and_then(Value::as_str)
    }
}

/// Pool of master pointers. The pool exclusively owns headers; everything
/// else addresses them through `HeaderId`. Mutated only under the collection
/// write lock (single-threaded during open).
#[derive(Debug, Default)]
pub struct MasterPointers {
    slots: Vec<Option<Header>>,
    free: Vec<HeaderId>,
    limit: Option<usize>,
}

impl MasterPointers {
    pub fn new() -> MasterPointers {
        MasterPointers::default()
    }

    /// A pool that refuses to grow past `limit` live headers. Exhaustion is
    /// a retryable `OutOfMemory`.
    pub fn with_limit(limit: usize) -> MasterPointers {
        MasterPointers {
            limit: Some(limit),
            ..MasterPointers::default()
        }
    }

    pub fn request(&mut self, header: Header) -> Result<HeaderId> {
        if let Some(id) = self.free.pop() {
            self.slots[id.0] = Some(header);
            return Ok(id);
        }
        if let Some(limit) = self.limit {
            if self.slots.len() >= limit {
                return Err(Error::OutOfMemory);
            }
        }
        let id = HeaderId(self.slots.len());
        self.slots.push(Some(header));
        Ok(id)
    }

    pub fn release(&mut self, id: HeaderId) -> Result<Header> {
        match self.slots.get_mut(id.0).and_then(Option::take) {
            Some(header) => {
                self.free.push(id);
                Ok(header)
            }
            None => Err(Error::Internal(format!(
                "release of header {} that is not live",
                id.0
            ))),
        }
    }

    pub fn get(&self, id: HeaderId) -> Option<&Header> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: HeaderId) -> Option<&mut Header> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Number of live headers.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn memory(&self) -> usize {
        self.slots.capacity() * std::mem::size_of::<Option<Header>>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn header(key: &str) -> Header {
        Header {
            fid: Fid(1),
            revision: Tick(1),
            key_hash: 0,
            marker_size: 64,
            data: Arc::new(json!({ "_key": key })),
        }
    }

    #[test]
    fn request_reuses_released_slots() {
        let mut pool = MasterPointers::new();
        let a = pool.request(header("a")).unwrap();
        let b = pool.request(header("b")).unwrap();
        assert_eq!(pool.len(), 2);

        pool.release(a).unwrap();
        assert_eq!(pool.len(), 1);

        let c = pool.request(header("c")).unwrap();
        assert_eq!(c, a);
        assert_eq!(pool.get(c).unwrap().key(), "c");
        assert_eq!(pool.get(b).unwrap().key(), "b");
    }

    #[test]
    fn double_release_is_an_error() {
        let mut pool = MasterPointers::new();
        let id = pool.request(header("a")).unwrap();
        pool.release(id).unwrap();
        assert!(matches!(pool.release(id), Err(Error::Internal(_))));
    }

    #[test]
    fn exhaustion_is_out_of_memory() {
        let mut pool = MasterPointers::with_limit(1);
        let id = pool.request(header("a")).unwrap();
        assert!(matches!(pool.request(header("b")), Err(Error::OutOfMemory)));

        // Retryable after a release.
        pool.release(id).unwrap();
        pool.request(header("b")).unwrap();
    }
}
