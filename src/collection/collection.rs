use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{error, trace};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde_json::Value;

use crate::collection::merge::{merge_objects_for_update, new_object_for_replace};
use crate::collection::operation::{DocumentOperation, OperationStatus, OperationType};
use crate::core::config::CollectionConfig;
use crate::core::error::{Error, Result};
use crate::core::figures::CollectionFigures;
use crate::core::types::{Fid, IndexId, Tick, ATTR_FROM, ATTR_KEY, ATTR_REV, ATTR_TO};
use crate::index::fill::{self, FillContext};
use crate::index::fulltext::DEFAULT_MIN_WORD_LENGTH;
use crate::index::primary::PrimaryIndex;
use crate::index::{Index, IndexDefinition, IndexType};
use crate::keygen::KeyGenerator;
use crate::locks::{
    DeadlockDetector, LockPolicy, DEADLOCK_PROBE_ITERATIONS, MAX_LOCK_TIMEOUT_MICROS,
};
use crate::storage::datafile::{Datafile, DatafileState};
use crate::storage::headers::{Header, HeaderId, MasterPointers};
use crate::storage::layout::CollectionLayout;
use crate::storage::marker::{Marker, MarkerKind};
use crate::storage::stats::DatafileStatisticsMap;
use crate::wal::LogManager;

/// A document read result: the payload plus its revision.
#[derive(Debug, Clone)]
pub struct Document {
    pub value: Arc<Value>,
    pub revision: Tick,
}

/// Outcome of a successful write operation.
#[derive(Debug, Clone)]
pub struct DocumentResult {
    pub key: String,
    pub revision: Tick,
    pub old_revision: Option<Tick>,
}

/// Options shared by the write operations.
#[derive(Debug, Clone, Copy)]
pub struct OperationOptions {
    pub wait_for_sync: bool,
    /// Skip the `_rev` precondition check.
    pub ignore_revs: bool,
    /// Update only: `null` values drop attributes when false.
    pub keep_null: bool,
    /// Update only: recursively merge sub-objects.
    pub merge_objects: bool,
    pub lock_policy: LockPolicy,
}

impl Default for OperationOptions {
    fn default() -> Self {
        OperationOptions {
            wait_for_sync: false,
            ignore_revs: false,
            keep_null: true,
            merge_objects: true,
            lock_policy: LockPolicy::Lock,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct CompactionStatus {
    pub reason: Option<String>,
    pub stamp: Option<DateTime<Utc>>,
    pub next_start_index: usize,
}

/// Everything guarded by the collection lock.
pub struct CollectionState {
    pub pool: MasterPointers,
    /// Primary index at slot 0; edge index, if any, at slot 1.
    pub indexes: Vec<Index>,
    pub key_generator: KeyGenerator,
    pub number_documents: u64,
    pub tick_max: Tick,
    pub journal: Option<Datafile>,
    pub datafiles: Vec<Datafile>,
    pub compactors: Vec<Datafile>,
}

/// A single collection: documents in append-only datafiles, a primary index
/// and optional secondary indexes over them, and a write path that reverts
/// all index mutations if any step fails.
pub struct DocumentCollection {
    pub(crate) config: CollectionConfig,
    pub(crate) layout: CollectionLayout,
    pub(crate) wal: Arc<LogManager>,
    pub(crate) detector: Arc<DeadlockDetector>,
    pub(crate) state: RwLock<CollectionState>,
    pub(crate) stats: DatafileStatisticsMap,

    pub(crate) uncollected_logfile_entries: AtomicI64,
    pub(crate) use_secondary_indexes_flag: AtomicBool,
    /// Number of indexes that want periodic cleanup (fulltext).
    pub(crate) cleanup_index_count: AtomicUsize,
    pub(crate) compaction: Mutex<CompactionStatus>,
}

// ---------------------------------------------------------------------------
// lock guards

pub struct CollectionReadGuard<'a> {
    guard: RwLockReadGuard<'a, CollectionState>,
    detector: Option<&'a DeadlockDetector>,
    collection_id: u64,
}

impl Deref for CollectionReadGuard<'_> {
    type Target = CollectionState;
    fn deref(&self) -> &CollectionState {
        &self.guard
    }
}

impl Drop for CollectionReadGuard<'_> {
    fn drop(&mut self) {
        if let Some(detector) = self.detector {
            detector.unset_reader(self.collection_id);
        }
    }
}

pub struct CollectionWriteGuard<'a> {
    guard: RwLockWriteGuard<'a, CollectionState>,
    detector: Option<&'a DeadlockDetector>,
    collection_id: u64,
}

impl Deref for CollectionWriteGuard<'_> {
    type Target = CollectionState;
    fn deref(&self) -> &CollectionState {
        &self.guard
    }
}

impl DerefMut for CollectionWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut CollectionState {
        &mut self.guard
    }
}

impl Drop for CollectionWriteGuard<'_> {
    fn drop(&mut self) {
        if let Some(detector) = self.detector {
            detector.unset_writer(self.collection_id);
        }
    }
}

// ---------------------------------------------------------------------------
// state-level index plumbing

impl CollectionState {
    pub(crate) fn primary(&self) -> &PrimaryIndex {
        match &self.indexes[0] {
            Index::Primary(primary) => primary,
            _ => unreachable!("primary index must occupy slot 0"),
        }
    }

    /// The edge index, if this is an edge collection. Slot 1 by invariant.
    pub(crate) fn edge_index(&self) -> Option<&crate::index::edge::EdgeIndex> {
        match self.indexes.get(1) {
            Some(Index::Edge(edge)) => Some(edge),
            _ => None,
        }
    }

    pub(crate) fn insert_primary_index(&mut self, header_id: HeaderId) -> Result<()> {
        let (head, _) = self.indexes.split_at_mut(1);
        let primary = match &mut head[0] {
            Index::Primary(primary) => primary,
            _ => unreachable!("primary index must occupy slot 0"),
        };
        match primary.insert_key(&self.pool, header_id)? {
            None => Ok(()),
            Some(_) => Err(Error::UniqueConstraintViolated),
        }
    }

    pub(crate) fn delete_primary_index(&mut self, header_id: HeaderId) -> Result<()> {
        let key = self
            .pool
            .get(header_id)
            .map(|header| header.key().to_string())
            .ok_or_else(|| Error::Internal("delete of unallocated header".into()))?;
        let (head, _) = self.indexes.split_at_mut(1);
        let primary = match &mut head[0] {
            Index::Primary(primary) => primary,
            _ => unreachable!("primary index must occupy slot 0"),
        };
        match primary.remove_key(&self.pool, &key) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound),
        }
    }

    /// Insert into every secondary index. Out-of-memory short-circuits; any
    /// other failures are aggregated with unique violations preferred.
    pub(crate) fn insert_secondary_indexes(
        &mut self,
        header_id: HeaderId,
        is_rollback: bool,
        use_secondary: bool,
    ) -> Result<()> {
        if !use_secondary {
            return Ok(());
        }
        let pool = &self.pool;
        let mut worst: Option<Error> = None;
        for index in self.indexes.iter_mut().skip(1) {
            match index.insert(pool, header_id, is_rollback) {
                Ok(()) => {}
                Err(Error::OutOfMemory) => return Err(Error::OutOfMemory),
                Err(err) => Error::accumulate(&mut worst, err),
            }
        }
        match worst {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub(crate) fn delete_secondary_indexes(
        &mut self,
        header_id: HeaderId,
        is_rollback: bool,
        use_secondary: bool,
    ) -> Result<()> {
        if !use_secondary {
            return Ok(());
        }
        let pool = &self.pool;
        let mut last: Option<Error> = None;
        for index in self.indexes.iter_mut().skip(1) {
            if let Err(err) = index.remove(pool, header_id, is_rollback) {
                last = Some(err);
            }
        }
        match last {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Low-level insert worker: primary first, then secondaries, unwinding
    /// inline on failure.
    fn insert_document(
        &mut self,
        operation: &mut DocumentOperation,
        use_secondary: bool,
    ) -> Result<()> {
        let header_id = operation
            .header
            .ok_or_else(|| Error::Internal("insert operation without a header".into()))?;

        self.insert_primary_index(header_id)?;

        if let Err(err) = self.insert_secondary_indexes(header_id, false, use_secondary) {
            let _ = self.delete_secondary_indexes(header_id, true, use_secondary);
            let _ = self.delete_primary_index(header_id);
            return Err(err);
        }

        self.number_documents += 1;
        operation.indexed();
        Ok(())
    }

    /// Low-level update worker: swap the secondary-index entries, retarget
    /// the header in place, restore the old state on failure. The key does
    /// not change, so the primary index is left alone.
    fn update_document(
        &mut self,
        operation: &mut DocumentOperation,
        new_fid: Fid,
        new_revision: Tick,
        new_data: Arc<Value>,
        new_marker_size: u32,
        use_secondary: bool,
    ) -> Result<()> {
        let header_id = operation
            .header
            .ok_or_else(|| Error::Internal("update operation without a header".into()))?;

        if let Err(err) = self.delete_secondary_indexes(header_id, false, use_secondary) {
            let _ = self.insert_secondary_indexes(header_id, true, use_secondary);
            return Err(err);
        }

        {
            let header = self
                .pool
                .get_mut(header_id)
                .ok_or_else(|| Error::Internal("update of unallocated header".into()))?;
            header.fid = new_fid;
            header.revision = new_revision;
            header.marker_size = new_marker_size;
            header.data = new_data;
        }

        if let Err(err) = self.insert_secondary_indexes(header_id, false, use_secondary) {
            let _ = self.delete_secondary_indexes(header_id, true, use_secondary);
            if let Some(old_data) = operation.old_data.clone() {
                if let Some(header) = self.pool.get_mut(header_id) {
                    *header = old_data;
                }
            }
            let _ = self.insert_secondary_indexes(header_id, true, use_secondary);
            return Err(err);
        }

        operation.indexed();
        Ok(())
    }

    /// Low-level remove worker.
    fn remove_document(
        &mut self,
        operation: &mut DocumentOperation,
        use_secondary: bool,
    ) -> Result<()> {
        let header_id = operation
            .header
            .ok_or_else(|| Error::Internal("remove operation without a header".into()))?;

        if let Err(err) = self.delete_secondary_indexes(header_id, false, use_secondary) {
            let _ = self.insert_secondary_indexes(header_id, true, use_secondary);
            return Err(err);
        }

        if let Err(err) = self.delete_primary_index(header_id) {
            let _ = self.insert_secondary_indexes(header_id, true, use_secondary);
            return Err(err);
        }

        operation.indexed();
        self.number_documents -= 1;
        Ok(())
    }

    /// Undo whatever the operation has done so far, in reverse order.
    pub(crate) fn revert_operation(
        &mut self,
        operation: &mut DocumentOperation,
        use_secondary: bool,
    ) {
        if operation.status != OperationStatus::Indexed {
            // Nothing made it into the indexes; only the insert header
            // allocation needs releasing.
            if operation.op_type == OperationType::Insert {
                if let Some(header_id) = operation.header {
                    let _ = self.pool.release(header_id);
                }
            }
            operation.status = OperationStatus::Reverted;
            return;
        }

        let Some(header_id) = operation.header else {
            operation.status = OperationStatus::Reverted;
            return;
        };

        match operation.op_type {
            OperationType::Insert => {
                let _ = self.delete_primary_index(header_id);
                let _ = self.delete_secondary_indexes(header_id, true, use_secondary);
                self.number_documents = self.number_documents.saturating_sub(1);
                let _ = self.pool.release(header_id);
            }
            OperationType::Update | OperationType::Replace => {
                let _ = self.delete_secondary_indexes(header_id, true, use_secondary);
                if let Some(old_data) = operation.old_data.clone() {
                    if let Some(header) = self.pool.get_mut(header_id) {
                        *header = old_data;
                    }
                }
                let _ = self.insert_secondary_indexes(header_id, true, use_secondary);
            }
            OperationType::Remove => match self.insert_primary_index(header_id) {
                Ok(()) => {
                    let _ = self.insert_secondary_indexes(header_id, true, use_secondary);
                    self.number_documents += 1;
                }
                Err(err) => {
                    error!("error rolling back remove operation: {err}");
                }
            },
        }

        operation.status = OperationStatus::Reverted;
    }
}

// ---------------------------------------------------------------------------
// the collection

impl DocumentCollection {
    /// Create a fresh collection in `dir` and write its parameter file and
    /// first journal.
    pub fn create(
        dir: &Path,
        config: CollectionConfig,
        wal: Arc<LogManager>,
        detector: Arc<DeadlockDetector>,
    ) -> Result<DocumentCollection> {
        let layout = CollectionLayout::create(dir.to_path_buf())?;
        layout.save_parameters(&config)?;

        let key_generator = KeyGenerator::factory(config.key_options.as_ref())?;

        let mut indexes = vec![Index::Primary(PrimaryIndex::with_capacity_hint(
            config.initial_count as usize,
        ))];
        if config.is_edge() {
            indexes.push(Index::Edge(crate::index::edge::EdgeIndex::new(IndexId(
                wal.new_tick().value(),
            ))));
        }

        let collection = DocumentCollection {
            layout,
            wal,
            detector,
            state: RwLock::new(CollectionState {
                pool: MasterPointers::new(),
                indexes,
                key_generator,
                number_documents: 0,
                tick_max: Tick::ZERO,
                journal: None,
                datafiles: Vec::new(),
                compactors: Vec::new(),
            }),
            stats: DatafileStatisticsMap::new(),
            uncollected_logfile_entries: AtomicI64::new(0),
            use_secondary_indexes_flag: AtomicBool::new(true),
            cleanup_index_count: AtomicUsize::new(0),
            compaction: Mutex::new(CompactionStatus::default()),
            config,
        };

        let journal = collection.create_journal()?;
        collection.state.write().journal = Some(journal);
        Ok(collection)
    }

    pub(crate) fn create_journal(&self) -> Result<Datafile> {
        let fid = Fid(self.wal.new_tick().value());
        let path = self.layout.datafile_path(fid, DatafileState::Journal);
        let journal = Datafile::create(
            &path,
            fid,
            DatafileState::Journal,
            self.config.id,
            self.config.collection_type,
            self.wal.new_tick(),
        )
        .map_err(|err| match err {
            Error::Io(_) | Error::FilesystemFull => Error::NoJournal,
            other => other,
        })?;
        self.stats.create(fid);
        Ok(journal)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn id(&self) -> u64 {
        self.config.id
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    pub fn is_edge(&self) -> bool {
        self.config.is_edge()
    }

    /// Number of live documents. Takes the read lock.
    pub fn size(&self) -> u64 {
        self.begin_read().number_documents
    }

    pub fn use_secondary_indexes(&self) -> bool {
        self.use_secondary_indexes_flag.load(Ordering::Acquire)
    }

    pub fn set_use_secondary_indexes(&self, value: bool) {
        self.use_secondary_indexes_flag.store(value, Ordering::Release);
    }

    pub fn set_compaction_status(&self, reason: &str) {
        let mut compaction = self.compaction.lock();
        compaction.reason = Some(reason.to_string());
        compaction.stamp = Some(Utc::now());
    }

    pub fn compaction_status(&self) -> (Option<String>, Option<DateTime<Utc>>) {
        let compaction = self.compaction.lock();
        (compaction.reason.clone(), compaction.stamp)
    }

    pub fn set_next_compaction_start_index(&self, index: usize) {
        self.compaction.lock().next_start_index = index;
    }

    pub fn next_compaction_start_index(&self) -> usize {
        self.compaction.lock().next_start_index
    }

    // -----------------------------------------------------------------------
    // locking

    /// Blocking read lock with deadlock-detector registration.
    pub fn begin_read(&self) -> CollectionReadGuard<'_> {
        let guard = self.state.read();
        self.detector.add_reader(self.config.id, false);
        CollectionReadGuard {
            guard,
            detector: Some(&self.detector),
            collection_id: self.config.id,
        }
    }

    /// Blocking write lock with deadlock-detector registration.
    pub fn begin_write(&self) -> CollectionWriteGuard<'_> {
        let guard = self.state.write();
        self.detector.add_writer(self.config.id, false);
        CollectionWriteGuard {
            guard,
            detector: Some(&self.detector),
            collection_id: self.config.id,
        }
    }

    /// Timed read lock: loop `try_lock` + sleep, registering as a blocked
    /// reader on first contention and probing for deadlocks every few
    /// iterations. `timeout == 0` means the 15-minute ceiling.
    pub fn begin_read_timed(
        &self,
        timeout_micros: u64,
        sleep_period_micros: u64,
    ) -> Result<CollectionReadGuard<'_>> {
        let timeout = if timeout_micros == 0 {
            MAX_LOCK_TIMEOUT_MICROS
        } else {
            timeout_micros
        };

        let mut iterations = 0u32;
        let mut was_blocked = false;
        let mut waited = 0u64;

        loop {
            if let Some(guard) = self.state.try_read() {
                self.detector.add_reader(self.config.id, was_blocked);
                return Ok(CollectionReadGuard {
                    guard,
                    detector: Some(&self.detector),
                    collection_id: self.config.id,
                });
            }

            if !was_blocked {
                was_blocked = true;
                if let Err(err) = self.detector.set_reader_blocked(self.config.id) {
                    trace!(
                        "deadlock detected while trying to acquire read-lock on collection '{}'",
                        self.config.name
                    );
                    return Err(err);
                }
                trace!("waiting for read-lock on collection '{}'", self.config.name);
            } else {
                iterations += 1;
                if iterations >= DEADLOCK_PROBE_ITERATIONS {
                    iterations = 0;
                    if let Err(err) = self.detector.detect_deadlock() {
                        self.detector.unset_reader_blocked();
                        trace!(
                            "deadlock detected while trying to acquire read-lock on collection '{}'",
                            self.config.name
                        );
                        return Err(err);
                    }
                }
            }

            std::thread::sleep(Duration::from_micros(sleep_period_micros));
            waited += sleep_period_micros;

            if waited > timeout {
                self.detector.unset_reader_blocked();
                trace!(
                    "timed out waiting for read-lock on collection '{}'",
                    self.config.name
                );
                return Err(Error::LockTimeout);
            }
        }
    }

    /// Timed write lock; see `begin_read_timed`.
    pub fn begin_write_timed(
        &self,
        timeout_micros: u64,
        sleep_period_micros: u64,
    ) -> Result<CollectionWriteGuard<'_>> {
        let timeout = if timeout_micros == 0 {
            MAX_LOCK_TIMEOUT_MICROS
        } else {
            timeout_micros
        };

        let mut iterations = 0u32;
        let mut was_blocked = false;
        let mut waited = 0u64;

        loop {
            if let Some(guard) = self.state.try_write() {
                self.detector.add_writer(self.config.id, was_blocked);
                return Ok(CollectionWriteGuard {
                    guard,
                    detector: Some(&self.detector),
                    collection_id: self.config.id,
                });
            }

            if !was_blocked {
                was_blocked = true;
                if let Err(err) = self.detector.set_writer_blocked(self.config.id) {
                    trace!(
                        "deadlock detected while trying to acquire write-lock on collection '{}'",
                        self.config.name
                    );
                    return Err(err);
                }
                trace!(
                    "waiting for write-lock on collection '{}'",
                    self.config.name
                );
            } else {
                iterations += 1;
                if iterations >= DEADLOCK_PROBE_ITERATIONS {
                    iterations = 0;
                    if let Err(err) = self.detector.detect_deadlock() {
                        self.detector.unset_writer_blocked();
                        trace!(
                            "deadlock detected while trying to acquire write-lock on collection '{}'",
                            self.config.name
                        );
                        return Err(err);
                    }
                }
            }

            std::thread::sleep(Duration::from_micros(sleep_period_micros));
            waited += sleep_period_micros;

            if waited > timeout {
                self.detector.unset_writer_blocked();
                trace!(
                    "timed out waiting for write-lock on collection '{}'",
                    self.config.name
                );
                return Err(Error::LockTimeout);
            }
        }
    }

    fn read_lock(&self, policy: LockPolicy) -> CollectionReadGuard<'_> {
        match policy {
            LockPolicy::Lock => self.begin_read(),
            LockPolicy::AlreadyLocked => CollectionReadGuard {
                guard: self.state.read(),
                detector: None,
                collection_id: self.config.id,
            },
        }
    }

    fn write_lock(&self, policy: LockPolicy) -> CollectionWriteGuard<'_> {
        match policy {
            LockPolicy::Lock => self.begin_write(),
            LockPolicy::AlreadyLocked => CollectionWriteGuard {
                guard: self.state.write(),
                detector: None,
                collection_id: self.config.id,
            },
        }
    }

    // -----------------------------------------------------------------------
    // document operations

    /// Point lookup by key under the read lock.
    pub fn read(&self, key: &str, policy: LockPolicy) -> Result<Document> {
        let guard = self.read_lock(policy);
        let header_id = guard
            .primary()
            .lookup_key(&guard.pool, key)
            .ok_or(Error::NotFound)?;
        let header = guard
            .pool
            .get(header_id)
            .ok_or_else(|| Error::Internal("primary index points at a free header".into()))?;
        Ok(Document {
            value: Arc::clone(&header.data),
            revision: header.revision,
        })
    }

    /// All edges leaving `vertex`. Empty on non-edge collections.
    pub fn edges_from(&self, vertex: &str, policy: LockPolicy) -> Vec<Document> {
        let guard = self.read_lock(policy);
        self.collect_edges(&guard, |edge| edge.lookup_from(vertex))
    }

    /// All edges arriving at `vertex`. Empty on non-edge collections.
    pub fn edges_to(&self, vertex: &str, policy: LockPolicy) -> Vec<Document> {
        let guard = self.read_lock(policy);
        self.collect_edges(&guard, |edge| edge.lookup_to(vertex))
    }

    fn collect_edges<'a, F>(&self, state: &'a CollectionState, lookup: F) -> Vec<Document>
    where
        F: FnOnce(&'a crate::index::edge::EdgeIndex) -> &'a [HeaderId],
    {
        let Some(edge) = state.edge_index() else {
            return Vec::new();
        };
        lookup(edge)
            .iter()
            .filter_map(|&header_id| state.pool.get(header_id))
            .map(|header| Document {
                value: Arc::clone(&header.data),
                revision: header.revision,
            })
            .collect()
    }

    fn check_edge_attributes(&self, value: &Value) -> Result<()> {
        for attr in [ATTR_FROM, ATTR_TO] {
            match value.get(attr) {
                Some(Value::String(_)) => {}
                _ => return Err(Error::InvalidEdgeAttribute),
            }
        }
        Ok(())
    }

    fn check_revision(expected: Option<&Value>, found: Tick) -> Result<()> {
        let expected_rev = match expected {
            Some(Value::String(text)) => text.parse::<u64>().unwrap_or(0),
            Some(Value::Number(number)) => number.as_u64().unwrap_or(0),
            _ => 0,
        };
        if expected_rev != 0 && found.value() != expected_rev {
            return Err(Error::Conflict {
                expected: expected_rev,
                found: found.value(),
            });
        }
        Ok(())
    }

    /// Submit the operation's marker to the log manager, then mirror it into
    /// the journal. Called after all index mutations succeeded.
    fn append_operation(
        &self,
        state: &mut CollectionState,
        operation: &mut DocumentOperation,
        wait_for_sync: bool,
    ) -> Result<Tick> {
        let slot = self
            .wal
            .allocate_and_write(&mut operation.marker, wait_for_sync)?;
        operation.tick = slot.tick;

        let journal = state.journal.as_mut().ok_or(Error::NoJournal)?;
        journal.append_marker(&operation.marker)?;
        self.uncollected_logfile_entries
            .fetch_add(1, Ordering::Relaxed);

        if slot.tick > state.tick_max {
            state.tick_max = slot.tick;
        }
        Ok(slot.tick)
    }

    /// Update per-file statistics after a successfully appended operation.
    fn apply_statistics(&self, state: &CollectionState, operation: &DocumentOperation) {
        let journal_fid = match state.journal.as_ref() {
            Some(journal) => journal.fid,
            None => return,
        };
        let marker_size = operation.marker.total_size() as u64;

        match operation.op_type {
            OperationType::Insert => {
                self.stats.update(journal_fid, |stats| {
                    stats.number_alive += 1;
                    stats.size_alive += marker_size;
                });
            }
            OperationType::Update | OperationType::Replace => {
                if let Some(old) = operation.old_data.as_ref() {
                    let old_size = old.marker_size as u64;
                    self.stats.update(old.fid, |stats| stats.mark_dead(old_size));
                }
                self.stats.update(journal_fid, |stats| {
                    stats.number_alive += 1;
                    stats.size_alive += marker_size;
                });
            }
            OperationType::Remove => {
                if let Some(old) = operation.old_data.as_ref() {
                    let old_size = old.marker_size as u64;
                    self.stats.update(old.fid, |stats| stats.mark_dead(old_size));
                }
                self.stats
                    .update(journal_fid, |stats| stats.number_deletions += 1);
            }
        }
    }

    /// Insert a document (or edge). The payload gains `_key` (validated or
    /// generated), `_id` and `_rev`.
    pub fn insert(&self, value: &Value, options: &OperationOptions) -> Result<DocumentResult> {
        if value.as_object().is_none() {
            return Err(Error::BadParameter("document must be an object".into()));
        }
        if self.is_edge() {
            self.check_edge_attributes(value)?;
        }

        let wait_for_sync = options.wait_for_sync || self.config.wait_for_sync;
        let mut marker_tick = Tick::ZERO;
        let result;

        {
            let mut guard = self.write_lock(options.lock_policy);
            let state = &mut *guard;

            let key = match value.get(ATTR_KEY) {
                Some(Value::String(key)) => {
                    state.key_generator.validate(key)?;
                    key.clone()
                }
                Some(_) => {
                    return Err(Error::BadParameter("_key must be a string".into()));
                }
                None => state.key_generator.generate(self.wal.new_tick()),
            };
            let revision = self.wal.new_tick();

            let mut payload = value.clone();
            {
                // Checked above: the payload is an object.
                let object = payload
                    .as_object_mut()
                    .ok_or_else(|| Error::Internal("payload stopped being an object".into()))?;
                object.insert(ATTR_KEY.to_string(), Value::String(key.clone()));
                object.insert(
                    crate::core::types::ATTR_ID.to_string(),
                    Value::String(format!("{}/{}", self.config.name, key)),
                );
                object.insert(ATTR_REV.to_string(), Value::String(revision.to_string()));
            }

            let payload_bytes = serde_json::to_vec(&payload)?;
            let marker = Marker::new(MarkerKind::VpackDocument, revision, payload_bytes);

            let journal_fid = state.journal.as_ref().map(|j| j.fid).ok_or(Error::NoJournal)?;
            let header = Header {
                fid: journal_fid,
                revision,
                key_hash: PrimaryIndex::hash_key(&key),
                marker_size: marker.total_size() as u32,
                data: Arc::new(payload),
            };

            let mut operation = DocumentOperation::new(OperationType::Insert, marker);
            // Out of memory here is harmless: nothing to revert yet.
            let header_id = state.pool.request(header)?;
            operation.header = Some(header_id);

            let use_secondary = self.use_secondary_indexes();
            if let Err(err) = state.insert_document(&mut operation, use_secondary) {
                state.revert_operation(&mut operation, use_secondary);
                return Err(err);
            }

            if let Err(err) = self.append_operation(state, &mut operation, wait_for_sync) {
                state.revert_operation(&mut operation, use_secondary);
                return Err(err);
            }

            self.apply_statistics(state, &operation);
            if wait_for_sync {
                marker_tick = operation.tick;
            }
            result = DocumentResult {
                key,
                revision,
                old_revision: None,
            };
        }

        if !marker_tick.is_zero() {
            // Wait for durability outside the lock.
            self.wal.wait_for_tick(marker_tick)?;
        }
        Ok(result)
    }

    /// Update a document: recursive merge of `new_value` into the stored
    /// document, honoring `keep_null` and `merge_objects`.
    pub fn update(&self, new_value: &Value, options: &OperationOptions) -> Result<DocumentResult> {
        self.modify(new_value, options, OperationType::Update)
    }

    /// Replace a document: the stored value becomes `new_value` with `_id`
    /// and `_key` preserved and a fresh `_rev`.
    pub fn replace(&self, new_value: &Value, options: &OperationOptions) -> Result<DocumentResult> {
        if self.is_edge() {
            self.check_edge_attributes(new_value)?;
        }
        self.modify(new_value, options, OperationType::Replace)
    }

    fn modify(
        &self,
        new_value: &Value,
        options: &OperationOptions,
        op_type: OperationType,
    ) -> Result<DocumentResult> {
        if new_value.as_object().is_none() {
            return Err(Error::BadParameter("document must be an object".into()));
        }

        let wait_for_sync = options.wait_for_sync || self.config.wait_for_sync;
        let mut marker_tick = Tick::ZERO;
        let result;

        {
            let mut guard = self.write_lock(options.lock_policy);
            let state = &mut *guard;

            let key = match new_value.get(ATTR_KEY) {
                Some(Value::String(key)) => key.clone(),
                _ => return Err(Error::BadParameter("_key must be a string".into())),
            };

            let header_id = state
                .primary()
                .lookup_key(&state.pool, &key)
                .ok_or(Error::NotFound)?;
            let (old_value, previous_revision) = {
                let header = state
                    .pool
                    .get(header_id)
                    .ok_or_else(|| Error::Internal("primary index points at a free header".into()))?;
                (Arc::clone(&header.data), header.revision)
            };

            if !options.ignore_revs {
                Self::check_revision(new_value.get(ATTR_REV), previous_revision)?;
            }

            let revision = self.wal.new_tick();
            let merged = match op_type {
                OperationType::Update => merge_objects_for_update(
                    &old_value,
                    new_value,
                    &revision.to_string(),
                    options.merge_objects,
                    options.keep_null,
                ),
                OperationType::Replace => {
                    new_object_for_replace(&old_value, new_value, &revision.to_string())
                }
                _ => return Err(Error::Internal("modify called with a non-modify type".into())),
            };

            let payload_bytes = serde_json::to_vec(&merged)?;
            let marker = Marker::new(MarkerKind::VpackDocument, revision, payload_bytes);
            let marker_size = marker.total_size() as u32;
            let journal_fid = state.journal.as_ref().map(|j| j.fid).ok_or(Error::NoJournal)?;

            let mut operation = DocumentOperation::new(op_type, marker);
            operation.attach_header(header_id, &state.pool);

            let use_secondary = self.use_secondary_indexes();
            if let Err(err) = state.update_document(
                &mut operation,
                journal_fid,
                revision,
                Arc::new(merged),
                marker_size,
                use_secondary,
            ) {
                state.revert_operation(&mut operation, use_secondary);
                return Err(err);
            }

            if let Err(err) = self.append_operation(state, &mut operation, wait_for_sync) {
                state.revert_operation(&mut operation, use_secondary);
                return Err(err);
            }

            self.apply_statistics(state, &operation);
            if wait_for_sync {
                marker_tick = operation.tick;
            }
            result = DocumentResult {
                key,
                revision,
                old_revision: Some(previous_revision),
            };
        }

        if !marker_tick.is_zero() {
            self.wal.wait_for_tick(marker_tick)?;
        }
        Ok(result)
    }

    /// Remove a document. `value` must carry `_key`; a `_rev` attribute is
    /// enforced as an expected revision unless `ignore_revs` is set.
    pub fn remove(&self, value: &Value, options: &OperationOptions) -> Result<DocumentResult> {
        let key = match value.get(ATTR_KEY) {
            Some(Value::String(key)) => key.clone(),
            _ => return Err(Error::BadParameter("_key must be a string".into())),
        };

        let wait_for_sync = options.wait_for_sync || self.config.wait_for_sync;
        let mut marker_tick = Tick::ZERO;
        let result;

        {
            let mut guard = self.write_lock(options.lock_policy);
            let state = &mut *guard;

            let header_id = state
                .primary()
                .lookup_key(&state.pool, &key)
                .ok_or(Error::NotFound)?;
            let previous_revision = state
                .pool
                .get(header_id)
                .map(|header| header.revision)
                .ok_or_else(|| Error::Internal("primary index points at a free header".into()))?;

            if !options.ignore_revs {
                Self::check_revision(value.get(ATTR_REV), previous_revision)?;
            }

            let revision = self.wal.new_tick();
            let mut payload = serde_json::Map::new();
            payload.insert(ATTR_KEY.to_string(), Value::String(key.clone()));
            payload.insert(ATTR_REV.to_string(), Value::String(revision.to_string()));
            let marker = Marker::new(
                MarkerKind::VpackRemove,
                revision,
                serde_json::to_vec(&Value::Object(payload))?,
            );

            let mut operation = DocumentOperation::new(OperationType::Remove, marker);
            operation.attach_header(header_id, &state.pool);

            let use_secondary = self.use_secondary_indexes();
            if let Err(err) = state.remove_document(&mut operation, use_secondary) {
                state.revert_operation(&mut operation, use_secondary);
                return Err(err);
            }

            if let Err(err) = self.append_operation(state, &mut operation, wait_for_sync) {
                state.revert_operation(&mut operation, use_secondary);
                return Err(err);
            }

            self.apply_statistics(state, &operation);
            // The document is gone; give the master pointer back to the pool.
            let _ = state.pool.release(header_id);

            if wait_for_sync {
                marker_tick = operation.tick;
            }
            result = DocumentResult {
                key,
                revision,
                old_revision: Some(previous_revision),
            };
        }

        if !marker_tick.is_zero() {
            self.wal.wait_for_tick(marker_tick)?;
        }
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // index management

    fn ensure_index(&self, mut definition: IndexDefinition) -> Result<(IndexId, bool)> {
        definition.validate()?;

        let mut guard = self.begin_write();
        let state = &mut *guard;

        // Dedupe first: an equivalent index wins over creating a new one.
        for index in &state.indexes {
            if index.matches(&definition) {
                return Ok((index.id(), false));
            }
        }

        let id = IndexId(self.wal.new_tick().value());
        definition.id = id.value().to_string();
        let mut index = Index::from_definition(&definition)?;

        {
            let context = FillContext {
                primary: state.primary(),
                pool: &state.pool,
                threads: self.config.indexing_threads,
                index_buckets: self.config.index_buckets,
            };
            fill::fill_index(&context, &mut index)?;
        }

        let is_fulltext = matches!(index, Index::Fulltext(_));
        state.indexes.push(index);

        if let Err(err) = self.save_index(&definition) {
            // Keep the index list consistent with the sidecars on disk.
            state.indexes.pop();
            return Err(err);
        }
        if is_fulltext {
            self.cleanup_index_count.fetch_add(1, Ordering::Relaxed);
        }

        Ok((id, true))
    }

    /// Persist the sidecar definition and write a create-index marker.
    fn save_index(&self, definition: &IndexDefinition) -> Result<()> {
        let data = serde_json::to_vec_pretty(definition)?;
        std::fs::write(self.layout.index_path(definition.index_id()?), data)?;

        let mut marker = Marker::new(
            MarkerKind::VpackCreateIndex,
            Tick::ZERO,
            serde_json::to_vec(definition)?,
        );
        self.wal.allocate_and_write(&mut marker, false)?;
        Ok(())
    }

    pub fn ensure_hash_index(
        &self,
        fields: &[&str],
        unique: bool,
        sparse: bool,
    ) -> Result<(IndexId, bool)> {
        self.ensure_index(IndexDefinition {
            id: "0".into(),
            index_type: IndexType::Hash,
            fields: fields.iter().map(|s| s.to_string()).collect(),
            unique,
            sparse: Some(sparse),
            geo_json: None,
            min_length: None,
        })
    }

    pub fn ensure_skiplist_index(
        &self,
        fields: &[&str],
        unique: bool,
        sparse: bool,
    ) -> Result<(IndexId, bool)> {
        self.ensure_index(IndexDefinition {
            id: "0".into(),
            index_type: IndexType::Skiplist,
            fields: fields.iter().map(|s| s.to_string()).collect(),
            unique,
            sparse: Some(sparse),
            geo_json: None,
            min_length: None,
        })
    }

    /// Geo index over a single `[lat, lon]` (or GeoJSON `[lon, lat]`)
    /// location attribute.
    pub fn ensure_geo_index_location(
        &self,
        location: &str,
        geo_json: bool,
    ) -> Result<(IndexId, bool)> {
        self.ensure_index(IndexDefinition {
            id: "0".into(),
            index_type: IndexType::Geo1,
            fields: vec![location.to_string()],
            unique: false,
            sparse: Some(true),
            geo_json: Some(geo_json),
            min_length: None,
        })
    }

    /// Geo index over a separate latitude / longitude attribute pair.
    pub fn ensure_geo_index_lat_lon(
        &self,
        latitude: &str,
        longitude: &str,
    ) -> Result<(IndexId, bool)> {
        self.ensure_index(IndexDefinition {
            id: "0".into(),
            index_type: IndexType::Geo2,
            fields: vec![latitude.to_string(), longitude.to_string()],
            unique: false,
            sparse: Some(true),
            geo_json: None,
            min_length: None,
        })
    }

    pub fn ensure_fulltext_index(
        &self,
        field: &str,
        min_word_length: Option<usize>,
    ) -> Result<(IndexId, bool)> {
        self.ensure_index(IndexDefinition {
            id: "0".into(),
            index_type: IndexType::Fulltext,
            fields: vec![field.to_string()],
            unique: false,
            sparse: Some(true),
            geo_json: None,
            min_length: Some(min_word_length.unwrap_or(DEFAULT_MIN_WORD_LENGTH) as u32),
        })
    }

    /// Drop a secondary index: remove it from the list, unlink its sidecar
    /// and write a drop marker. Returns whether an index was dropped.
    /// Primary and edge indexes cannot be dropped.
    pub fn drop_index(&self, id: IndexId) -> Result<bool> {
        if id.value() == 0 {
            return Ok(false);
        }

        let removed = {
            let mut guard = self.begin_write();
            let state = &mut *guard;
            let position = state.indexes.iter().position(|index| {
                index.id() == id
                    && !matches!(
                        index.index_type(),
                        IndexType::Primary | IndexType::Edge
                    )
            });
            match position {
                Some(position) => {
                    let index = state.indexes.remove(position);
                    if matches!(index, Index::Fulltext(_)) {
                        self.cleanup_index_count.fetch_sub(1, Ordering::Relaxed);
                    }
                    true
                }
                None => false,
            }
        };

        if !removed {
            return Ok(false);
        }

        if let Err(err) = self.layout.remove_index_file(id) {
            error!("cannot remove index definition: {err}");
        }

        let payload = serde_json::json!({ "id": id.value().to_string() });
        let mut marker = Marker::new(
            MarkerKind::VpackDropIndex,
            Tick::ZERO,
            serde_json::to_vec(&payload)?,
        );
        self.wal.allocate_and_write(&mut marker, false)?;
        Ok(true)
    }

    /// All index definitions, primary first.
    pub fn index_definitions(&self) -> Vec<IndexDefinition> {
        self.begin_read()
            .indexes
            .iter()
            .map(Index::definition)
            .collect()
    }

    pub fn lookup_index(&self, id: IndexId) -> Option<IndexDefinition> {
        self.begin_read()
            .indexes
            .iter()
            .find(|index| index.id() == id)
            .map(Index::definition)
    }

    /// Garbage-loop hook: compact fulltext indexes. Cheap no-op unless the
    /// collection has indexes asking for cleanup.
    pub fn cleanup_indexes(&self) -> Result<()> {
        if self.cleanup_index_count.load(Ordering::Relaxed) == 0 {
            return Ok(());
        }
        let mut guard = self.begin_write();
        for index in guard.indexes.iter_mut() {
            if matches!(index, Index::Fulltext(_)) {
                index.cleanup()?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // journal management and figures

    /// Seal the active journal and start a fresh one. The sealed file is
    /// renamed into the datafile series.
    pub fn rotate_journal(&self) -> Result<()> {
        let mut guard = self.begin_write();
        let state = &mut *guard;

        let mut journal = state.journal.take().ok_or(Error::NoJournal)?;
        journal.seal(self.wal.new_tick())?;
        let sealed_path = self
            .layout
            .datafile_path(journal.fid, DatafileState::Sealed);
        journal.rename(&sealed_path)?;
        state.datafiles.push(journal);

        state.journal = Some(self.create_journal()?);
        Ok(())
    }

    /// Aggregate figures under the read lock.
    pub fn figures(&self) -> CollectionFigures {
        let guard = self.begin_read();
        let state = &*guard;

        let totals = self.stats.all();
        let mut figures = CollectionFigures {
            number_documents: state.number_documents,
            number_alive: totals.number_alive,
            number_dead: totals.number_dead,
            number_deletions: totals.number_deletions,
            size_alive: totals.size_alive,
            size_dead: totals.size_dead,
            uncollected_logfile_entries: self.uncollected_logfile_entries.load(Ordering::Relaxed),
            tick_max: state.tick_max.value(),
            ..CollectionFigures::default()
        };

        for datafile in &state.datafiles {
            figures.number_datafiles += 1;
            figures.datafile_size += datafile.current_size;
        }
        if let Some(journal) = &state.journal {
            figures.number_journalfiles = 1;
            figures.journalfile_size = journal.current_size;
        }
        for compactor in &state.compactors {
            figures.number_compactorfiles += 1;
            figures.compactorfile_size += compactor.current_size;
        }

        figures.size_indexes = state.pool.memory() as u64;
        for index in &state.indexes {
            figures.number_indexes += 1;
            figures.size_indexes += index.memory() as u64;
        }

        let (reason, stamp) = self.compaction_status();
        figures.last_compaction_status = reason;
        figures.last_compaction_stamp = stamp;
        figures
    }
}
