use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::error::Result;
use crate::core::types::Tick;

/// Persisted per-collection counter state: document count, last revision,
/// and the sequence the values are valid at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterValue {
    pub count: u64,
    pub revision: u64,
    pub sequence: u64,
}

/// One delta applied by a collection after a batch of operations.
#[derive(Debug, Clone, Copy)]
pub struct CounterAdjustment {
    pub sequence: Tick,
    pub added: u64,
    pub removed: u64,
    pub revision: Tick,
}

/// Tracks document counts and synced sequences for all collections of an
/// engine, persisting them in one sidecar file. `sync` is self-excluding:
/// a second call while one is running is skipped unless forced.
#[derive(Debug)]
pub struct CounterManager {
    path: PathBuf,
    counters: RwLock<HashMap<u64, CounterValue>>,
    synced_sequences: RwLock<HashMap<u64, u64>>,
    syncing: AtomicBool,
}

impl CounterManager {
    /// Open the counter file, loading previously synced values if present.
    pub fn open(path: &Path) -> Result<CounterManager> {
        let counters: HashMap<u64, CounterValue> = if path.exists() {
            bincode::deserialize(&std::fs::read(path)?)?
        } else {
            HashMap::new()
        };

        let synced_sequences = counters
            .iter()
            .map(|(&id, value)| (id, value.sequence))
            .collect();

        Ok(CounterManager {
            path: path.to_path_buf(),
            counters: RwLock::new(counters),
            synced_sequences: RwLock::new(synced_sequences),
            syncing: AtomicBool::new(false),
        })
    }

    pub fn load_counter(&self, collection_id: u64) -> CounterValue {
        self.counters
            .read()
            .get(&collection_id)
            .copied()
            .unwrap_or_default()
    }

    /// Apply an adjustment. Stale adjustments (at or before the stored
    /// sequence) are ignored.
    pub fn update_counter(&self, collection_id: u64, adjustment: &CounterAdjustment) {
        let mut counters = self.counters.write();
        let value = counters.entry(collection_id).or_default();
        if adjustment.sequence.value() <= value.sequence {
            return;
        }
        value.count = (value.count + adjustment.added).saturating_sub(adjustment.removed);
        value.sequence = adjustment.sequence.value();
        if adjustment.revision.value() > value.revision {
            value.revision = adjustment.revision.value();
        }
    }

    pub fn remove_counter(&self, collection_id: u64) {
        self.counters.write().remove(&collection_id);
        self.synced_sequences.write().remove(&collection_id);
    }

    /// Persist all counters. Returns `false` when skipped because another
    /// sync is in flight and `force` was not set.
    pub fn sync(&self, force: bool) -> Result<bool> {
        if self.syncing.swap(true, Ordering::AcqRel) && !force {
            return Ok(false);
        }

        let result = self.write_out();
        self.syncing.store(false, Ordering::Release);
        result?;
        Ok(true)
    }

    fn write_out(&self) -> Result<()> {
        let snapshot = self.counters.read().clone();
        let data = bincode::serialize(&snapshot)?;
        std::fs::write(&self.path, data)?;

        let mut synced = self.synced_sequences.write();
        for (id, value) in snapshot {
            synced.insert(id, value.sequence);
        }
        Ok(())
    }

    pub fn synced_sequence(&self, collection_id: u64) -> u64 {
        self.synced_sequences
            .read()
            .get(&collection_id)
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adjustment(sequence: u64, added: u64, removed: u64, revision: u64) -> CounterAdjustment {
        CounterAdjustment {
            sequence: Tick(sequence),
            added,
            removed,
            revision: Tick(revision),
        }
    }

    #[test]
    fn adjustments_apply_in_sequence_order() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CounterManager::open(&dir.path().join("counters.bin")).unwrap();

        manager.update_counter(1, &adjustment(10, 5, 0, 100));
        manager.update_counter(1, &adjustment(20, 2, 3, 120));
        // Stale: already covered by sequence 20.
        manager.update_counter(1, &adjustment(15, 50, 0, 90));

        let value = manager.load_counter(1);
        assert_eq!(value.count, 4);
        assert_eq!(value.revision, 120);
        assert_eq!(value.sequence, 20);
    }

    #[test]
    fn sync_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counters.bin");

        {
            let manager = CounterManager::open(&path).unwrap();
            manager.update_counter(7, &adjustment(5, 9, 0, 42));
            assert!(manager.sync(false).unwrap());
            assert_eq!(manager.synced_sequence(7), 5);
        }

        let reopened = CounterManager::open(&path).unwrap();
        let value = reopened.load_counter(7);
        assert_eq!(value.count, 9);
        assert_eq!(value.revision, 42);
        assert_eq!(reopened.synced_sequence(7), 5);
    }
}
