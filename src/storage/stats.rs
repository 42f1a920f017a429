use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::types::Fid;

/// Marker counters for one datafile. `alive + dead` equals the number of
/// document markers in the file; `deletions` counts removal markers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatafileStatistics {
    pub number_alive: u64,
    pub number_dead: u64,
    pub number_deletions: u64,
    pub size_alive: u64,
    pub size_dead: u64,
}

impl DatafileStatistics {
    pub fn add(&mut self, other: &DatafileStatistics) {
        self.number_alive += other.number_alive;
        self.number_dead += other.number_dead;
        self.number_deletions += other.number_deletions;
        self.size_alive += other.size_alive;
        self.size_dead += other.size_dead;
    }

    /// Reclassify one alive marker of `size` bytes as dead.
    pub fn mark_dead(&mut self, size: u64) {
        self.number_alive = self.number_alive.saturating_sub(1);
        self.size_alive = self.size_alive.saturating_sub(size);
        self.number_dead += 1;
        self.size_dead += size;
    }
}

/// Per-file statistics container, keyed by file id.
#[derive(Debug, Default)]
pub struct DatafileStatisticsMap {
    inner: Mutex<HashMap<Fid, DatafileStatistics>>,
}

impl DatafileStatisticsMap {
    pub fn new() -> DatafileStatisticsMap {
        DatafileStatisticsMap::default()
    }

    /// Ensure an entry exists for `fid`.
    pub fn create(&self, fid: Fid) {
        self.inner.lock().entry(fid).or_default();
    }

    pub fn update<F: FnOnce(&mut DatafileStatistics)>(&self, fid: Fid, f: F) {
        let mut inner = self.inner.lock();
        f(inner.entry(fid).or_default())
    }

    pub fn get(&self, fid: Fid) -> DatafileStatistics {
        self.inner.lock().get(&fid).copied().unwrap_or_default()
    }

    /// Sum over all files.
    pub fn all(&self) -> DatafileStatistics {
        let inner = self.inner.lock();
        let mut total = DatafileStatistics::default();
        for stats in inner.values() {
            total.add(stats);
        }
        total
    }

    /// Install a freshly computed map, discarding previous contents. Used
    /// once at the end of recovery.
    pub fn replace_all(&self, stats: HashMap<Fid, DatafileStatistics>) {
        *self.inner.lock() = stats;
    }

    pub fn file_count(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_dead_moves_counters() {
        let mut stats = DatafileStatistics {
            number_alive: 2,
            size_alive: 100,
            ..Default::default()
        };
        stats.mark_dead(60);
        assert_eq!(stats.number_alive, 1);
        assert_eq!(stats.size_alive, 40);
        assert_eq!(stats.number_dead, 1);
        assert_eq!(stats.size_dead, 60);
    }

    #[test]
    fn map_sums_all_files() {
        let map = DatafileStatisticsMap::new();
        map.update(Fid(1), |s| {
            s.number_alive = 3;
            s.size_alive = 96;
        });
        map.update(Fid(2), |s| {
            s.number_alive = 4;
            s.number_deletions = 1;
        });

        let total = map.all();
        assert_eq!(total.number_alive, 7);
        assert_eq!(total.size_alive, 96);
        assert_eq!(total.number_deletions, 1);
        assert_eq!(map.file_count(), 2);
    }
}
