use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregated collection figures: document and marker counts, byte sizes,
/// file counts, index memory. Produced under the collection read lock.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionFigures {
    pub number_documents: u64,

    // Datafile statistics, summed over all files.
    pub number_alive: u64,
    pub number_dead: u64,
    pub number_deletions: u64,
    pub size_alive: u64,
    pub size_dead: u64,

    // Physical file inventory.
    pub number_datafiles: u64,
    pub datafile_size: u64,
    pub number_journalfiles: u64,
    pub journalfile_size: u64,
    pub number_compactorfiles: u64,
    pub compactorfile_size: u64,

    // Index inventory (the master-pointer pool counts toward index memory).
    pub number_indexes: u64,
    pub size_indexes: u64,

    pub uncollected_logfile_entries: i64,
    pub tick_max: u64,

    pub last_compaction_status: Option<String>,
    pub last_compaction_stamp: Option<DateTime<Utc>>,
}
