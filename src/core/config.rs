use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::CollectionType;

/// Per-collection parameters, persisted as `parameter.json` in the
/// collection directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub id: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub collection_type: CollectionType,

    /// Default durability for write operations without an explicit option.
    pub wait_for_sync: bool,

    /// Bucket hint for hash-like indexes; more than one bucket enables the
    /// batched index fill path.
    pub index_buckets: u32,

    /// Document count hint used to pre-size the primary index on open.
    pub initial_count: u64,

    /// Key generator options (`{"type": "traditional" | "autoincrement" |
    /// "uuid", ...}`); `None` selects the traditional generator.
    pub key_options: Option<Value>,

    /// Worker threads for parallel index fill. `None` disables the thread
    /// pool and forces sequential fill.
    pub indexing_threads: Option<usize>,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        CollectionConfig {
            id: 0,
            name: String::new(),
            collection_type: CollectionType::Document,
            wait_for_sync: false,
            index_buckets: 8,
            initial_count: 0,
            key_options: None,
            indexing_threads: None,
        }
    }
}

impl CollectionConfig {
    pub fn new(id: u64, name: impl Into<String>, collection_type: CollectionType) -> Self {
        CollectionConfig {
            id,
            name: name.into(),
            collection_type,
            ..CollectionConfig::default()
        }
    }

    pub fn is_edge(&self) -> bool {
        self.collection_type == CollectionType::Edge
    }
}
