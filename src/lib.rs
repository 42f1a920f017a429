pub mod collection;
pub mod core;
pub mod counter;
pub mod index;
pub mod keygen;
pub mod locks;
pub mod storage;
pub mod wal;

pub use crate::collection::{Document, DocumentCollection, DocumentResult, OperationOptions};
pub use crate::core::config::CollectionConfig;
pub use crate::core::engine::StorageEngine;
pub use crate::core::error::{Error, Result};
pub use crate::core::types::{CollectionType, Fid, IndexId, Tick};
pub use crate::locks::LockPolicy;

/*
┌──────────────────────────────────────────────────────────────────────────────┐
│                          VELLUMDB STRUCT ARCHITECTURE                         │
└──────────────────────────────────────────────────────────────────────────────┘

┌─────────────────────────────────── ENGINE ───────────────────────────────────┐
│                                                                               │
│  ┌─────────────────────────────────────────────────────────────────────┐    │
│  │                        struct StorageEngine                          │    │
│  │  wal: Arc<LogManager>            // tick sequence + durable log     │    │
│  │  detector: Arc<DeadlockDetector> // process-wide waiter graph       │    │
│  │  counters: CounterManager        // persisted per-collection counts │    │
│  │  collections: RwLock<HashMap<String, Arc<DocumentCollection>>>      │    │
│  └─────────────────────────────────────────────────────────────────────┘    │
└───────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────── COLLECTION ──────────────────────────────────┐
│                                                                               │
│  ┌─────────────────────────────────────────────────────────────────────┐    │
│  │                     struct DocumentCollection                        │    │
│  │  state: RwLock<CollectionState>  // THE collection lock             │    │
│  │  stats: DatafileStatisticsMap    // alive/dead/deletions per fid    │    │
│  │  compaction: Mutex<CompactionStatus>                                │    │
│  │  use_secondary_indexes, cleanup_index_count, uncollected: atomics   │    │
│  └─────────────────────────────────────────────────────────────────────┘    │
│                                                                               │
│  ┌──────────────────────────┐  ┌─────────────────────────────────────┐      │
│  │ struct CollectionState   │  │ struct DocumentOperation            │      │
│  │ • pool: MasterPointers   │  │ • marker, header, old_data          │      │
│  │ • indexes: Vec<Index>    │  │ • status: Created/Indexed/Reverted  │      │
│  │   [0] primary [1] edge?  │  │   revert() undoes index mutations   │      │
│  │ • journal + datafiles    │  └─────────────────────────────────────┘      │
│  │ • key_generator          │                                                │
│  │ • number_documents       │  write path: lock → lookup → marker →         │
│  │ • tick_max               │  secondary swap → WAL append → revert         │
│  └──────────────────────────┘  on any partial failure                        │
└───────────────────────────────────────────────────────────────────────────────┘

┌────────────────────────────────── INDEXES ───────────────────────────────────┐
│                                                                               │
│  enum Index                  shared capability set:                           │
│  • Primary(PrimaryIndex)     insert / remove / batch_insert / size_hint /    │
│  • Edge(EdgeIndex)           selectivity_estimate / memory / cleanup /       │
│  • Hash(HashIndex)           context / definition / matches                  │
│  • Skiplist(SkiplistIndex)                                                   │
│  • Geo(GeoIndex)             PrimaryIndex: robin-hood open addressing with   │
│  • Fulltext(FulltextIndex)   a stable sequential bucket walk; indexes hold   │
│                              HeaderId handles, never pointers                │
│                                                                               │
│  fill::fill_indexes: batch (rayon fan-out, 1 Mi header blocks) above         │
│  256 Ki primary entries, sequential otherwise; worst error wins              │
└───────────────────────────────────────────────────────────────────────────────┘

┌────────────────────────────────── STORAGE ───────────────────────────────────┐
│                                                                               │
│  Datafile: HEADER COL_HEADER [PROLOGUE] marker… [FOOTER]                     │
│  Marker:   kind | size | tick | crc32 | payload-len | json payload            │
│            (crc over the whole marker with the crc field zeroed)             │
│                                                                               │
│  LogManager: allocate_and_write(marker) → SlotInfo{tick},                    │
│              wait_for_tick(tick), is_in_recovery()                           │
│                                                                               │
│  recovery: forward replay of datafiles in fid order rebuilds the primary     │
│  index, master pointers and per-file statistics; index-<id>.json sidecars    │
│  are then materialized and filled from the primary index                     │
└───────────────────────────────────────────────────────────────────────────────┘
*/
