use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize};
use std::sync::Arc;

use log::{debug, error, trace, warn};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::collection::collection::{CollectionState, CompactionStatus, DocumentCollection};
use crate::core::error::{Error, Result};
use crate::core::types::{Fid, IndexId, Tick, ATTR_KEY, ATTR_REV};
use crate::index::edge::EdgeIndex;
use crate::index::fill::{self, FillContext};
use crate::index::primary::PrimaryIndex;
use crate::index::{Index, IndexDefinition};
use crate::keygen::KeyGenerator;
use crate::locks::DeadlockDetector;
use crate::storage::datafile::{Datafile, DatafileState};
use crate::storage::headers::Header;
use crate::storage::layout::CollectionLayout;
use crate::storage::marker::{Marker, MarkerKind};
use crate::storage::stats::{DatafileStatistics, DatafileStatisticsMap};
use crate::wal::LogManager;

fn parse_revision(payload: &Value) -> Result<Tick> {
    match payload.get(ATTR_REV) {
        Some(Value::String(text)) => text
            .parse::<u64>()
            .map(Tick)
            .map_err(|_| Error::BadParameter(format!("invalid _rev '{text}'"))),
        Some(Value::Number(number)) => number
            .as_u64()
            .map(Tick)
            .ok_or_else(|| Error::BadParameter("invalid numeric _rev".into())),
        _ => Err(Error::BadParameter("marker payload without _rev".into())),
    }
}

fn parse_key(payload: &Value) -> Result<String> {
    match payload.get(ATTR_KEY) {
        Some(Value::String(key)) => Ok(key.clone()),
        _ => Err(Error::BadParameter("marker payload without _key".into())),
    }
}

/// Replay one document marker: request or retarget a header, keep the
/// per-file alive/dead accounting consistent.
fn handle_document_marker(
    state: &mut CollectionState,
    stats: &mut HashMap<Fid, DatafileStatistics>,
    fid: Fid,
    marker: &Marker,
    documents: &mut u64,
) -> Result<()> {
    let payload: Value = serde_json::from_slice(&marker.payload)
        .map_err(|err| Error::BadParameter(format!("non-object marker payload: {err}")))?;
    if !payload.is_object() {
        return Err(Error::BadParameter("non-object marker payload".into()));
    }

    let key = parse_key(&payload)?;
    let revision = parse_revision(&payload)?;
    state.key_generator.track(&key);
    if revision > state.tick_max {
        state.tick_max = revision;
    }
    *documents += 1;

    let size = marker.total_size() as u64;
    let found = state.primary().lookup_key(&state.pool, &key);

    match found {
        // A new entry.
        None => {
            let header = Header {
                fid,
                revision,
                key_hash: PrimaryIndex::hash_key(&key),
                marker_size: size as u32,
                data: Arc::new(payload),
            };
            let header_id = state.pool.request(header)?;
            if let Err(err) = state.insert_primary_index(header_id) {
                let _ = state.pool.release(header_id);
                error!("inserting document into primary index failed: {err}");
                return Err(err);
            }
            state.number_documents += 1;

            let file_stats = stats.entry(fid).or_default();
            file_stats.number_alive += 1;
            file_stats.size_alive += size;
        }
        Some(found_id) => {
            let (found_revision, found_fid, old_size) = {
                let header = state
                    .pool
                    .get(found_id)
                    .ok_or_else(|| Error::Internal("primary index points at a free header".into()))?;
                (header.revision, header.fid, header.marker_size as u64)
            };

            // An update, but only if the stored version is older.
            if found_revision < revision || (found_revision == revision && found_fid <= fid) {
                {
                    let header = state.pool.get_mut(found_id).ok_or_else(|| {
                        Error::Internal("primary index points at a free header".into())
                    })?;
                    header.fid = fid;
                    header.revision = revision;
                    header.marker_size = size as u32;
                    header.data = Arc::new(payload);
                }
                stats.entry(found_fid).or_default().mark_dead(old_size);
                let file_stats = stats.entry(fid).or_default();
                file_stats.number_alive += 1;
                file_stats.size_alive += size;
            } else {
                // A stale update: the marker is dead on its own file.
                let file_stats = stats.entry(fid).or_default();
                file_stats.number_dead += 1;
                file_stats.size_dead += size;
            }
        }
    }

    Ok(())
}

/// Replay one deletion marker.
fn handle_deletion_marker(
    state: &mut CollectionState,
    stats: &mut HashMap<Fid, DatafileStatistics>,
    fid: Fid,
    marker: &Marker,
    deletions: &mut u64,
) -> Result<()> {
    let payload: Value = serde_json::from_slice(&marker.payload)
        .map_err(|err| Error::BadParameter(format!("non-object marker payload: {err}")))?;
    let key = parse_key(&payload)?;
    let revision = parse_revision(&payload)?;
    state.key_generator.track(&key);
    if revision > state.tick_max {
        state.tick_max = revision;
    }
    *deletions += 1;

    match state.primary().lookup_key(&state.pool, &key) {
        // We missed the create; only count the deletion.
        None => {
            stats.entry(fid).or_default().number_deletions += 1;
        }
        Some(found_id) => {
            let (found_fid, old_size) = {
                let header = state
                    .pool
                    .get(found_id)
                    .ok_or_else(|| Error::Internal("primary index points at a free header".into()))?;
                (header.fid, header.marker_size as u64)
            };
            stats.entry(found_fid).or_default().mark_dead(old_size);
            stats.entry(fid).or_default().number_deletions += 1;

            state.delete_primary_index(found_id)?;
            state.number_documents -= 1;
            let _ = state.pool.release(found_id);
        }
    }

    Ok(())
}

impl DocumentCollection {
    /// Open an existing collection: replay every datafile marker in tick
    /// order to rebuild the primary index and per-file statistics, then
    /// materialize the secondary indexes from their sidecar definitions.
    pub fn open(
        dir: &Path,
        wal: Arc<LogManager>,
        detector: Arc<DeadlockDetector>,
        ignore_errors: bool,
    ) -> Result<DocumentCollection> {
        let layout = CollectionLayout::open(dir.to_path_buf())?;
        let config = layout.load_parameters()?;
        let key_generator = KeyGenerator::factory(config.key_options.as_ref())?;

        debug!("open-document-collection {{ collection: {} }}", config.name);

        let mut indexes = vec![Index::Primary(PrimaryIndex::with_capacity_hint(
            config.initial_count as usize,
        ))];
        if config.is_edge() {
            indexes.push(Index::Edge(EdgeIndex::new(IndexId(wal.new_tick().value()))));
        }

        let collection = DocumentCollection {
            layout,
            wal,
            detector,
            state: RwLock::new(CollectionState {
                pool: crate::storage::headers::MasterPointers::new(),
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

        collection.iterate_markers(ignore_errors)?;
        collection.open_index_sidecars(ignore_errors)?;

        if !collection.wal.is_in_recovery() {
            collection.fill_secondary_indexes()?;
        }

        Ok(collection)
    }

    /// Forward replay of all datafiles (sealed first, journals last, in fid
    /// order within each group).
    fn iterate_markers(&self, ignore_errors: bool) -> Result<()> {
        let files = self.layout.list_datafiles()?;

        let mut state = self.state.write();
        let mut stats: HashMap<Fid, DatafileStatistics> = HashMap::new();
        let mut documents = 0u64;
        let mut deletions = 0u64;
        let mut journals: Vec<Datafile> = Vec::new();
        let mut max_fid = 0u64;

        for (fid, path, file_state) in files {
            let mut datafile = Datafile::open(&path, fid, file_state)?;
            max_fid = max_fid.max(fid.value());
            stats.entry(fid).or_default();

            let iterated = datafile.iterate(ignore_errors, |marker| {
                match marker.kind {
                    MarkerKind::VpackDocument => {
                        handle_document_marker(&mut state, &mut stats, fid, marker, &mut documents)?
                    }
                    MarkerKind::VpackRemove => {
                        handle_deletion_marker(&mut state, &mut stats, fid, marker, &mut deletions)?
                    }
                    kind => {
                        trace!("skipping marker kind {kind:?} during replay");
                    }
                }
                if !marker.kind.is_structural() && marker.tick > state.tick_max {
                    state.tick_max = marker.tick;
                }
                Ok(())
            });

            let sealed = match iterated {
                Ok(sealed) => sealed,
                Err(err) if ignore_errors => {
                    warn!(
                        "ignoring replay error in '{}': {err}",
                        datafile.path().display()
                    );
                    false
                }
                Err(err) => return Err(err),
            };

            if !sealed && file_state == DatafileState::Journal {
                journals.push(datafile);
            } else {
                datafile.state = DatafileState::Sealed;
                state.datafiles.push(datafile);
            }
        }

        // The newest unsealed journal stays the append target; stragglers
        // are frozen in place.
        let active = journals.pop();
        for mut stale in journals {
            stale.state = DatafileState::Sealed;
            state.datafiles.push(stale);
        }
        if let Some(mut journal) = active {
            // A crash may have torn the last marker; cut it off before
            // appending anything new behind it.
            journal.truncate_to_valid()?;
            journal.reopen_for_append()?;
            state.journal = Some(journal);
        }

        // Ticks restart past everything the datafiles have seen, even if the
        // log file itself is gone.
        self.wal.advance_to(Tick(state.tick_max.value().max(max_fid)));

        debug!(
            "replayed {documents} document and {deletions} deletion markers for collection '{}'",
            self.config.name
        );
        self.stats.replace_all(stats);

        if state.journal.is_none() {
            drop(state);
            let journal = self.create_journal()?;
            self.state.write().journal = Some(journal);
        }
        Ok(())
    }

    /// Parse every `index-<id>.json` sidecar and register the (still empty)
    /// secondary indexes.
    fn open_index_sidecars(&self, ignore_errors: bool) -> Result<()> {
        let sidecars = self.layout.list_index_files()?;
        let mut state = self.state.write();

        for (id, path) in sidecars {
            let definition: IndexDefinition = match std::fs::read(&path)
                .map_err(Error::from)
                .and_then(|data| serde_json::from_slice(&data).map_err(Error::from))
            {
                Ok(definition) => definition,
                Err(err) => {
                    error!(
                        "failed to parse index definition from '{}': {err}",
                        path.display()
                    );
                    if ignore_errors {
                        continue;
                    }
                    return Err(err);
                }
            };

            let index = Index::from_definition(&definition)?;
            if index.id() != id {
                return Err(Error::BadParameter(format!(
                    "index id mismatch in '{}'",
                    path.display()
                )));
            }
            if matches!(index, Index::Fulltext(_)) {
                self.cleanup_index_count
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            state.indexes.push(index);
        }

        Ok(())
    }

    /// Construct all secondary indexes from the primary index, fanning out
    /// across the fill pool when one is configured.
    fn fill_secondary_indexes(&self) -> Result<()> {
        let was_enabled = self.use_secondary_indexes();
        if !was_enabled {
            return Ok(());
        }

        let mut state = self.state.write();
        let state = &mut *state;
        let (head, tail) = state.indexes.split_at_mut(1);
        if tail.is_empty() {
            return Ok(());
        }
        let primary = match &head[0] {
            Index::Primary(primary) => primary,
            _ => unreachable!("primary index must occupy slot 0"),
        };

        let context = FillContext {
            primary,
            pool: &state.pool,
            threads: self.config.indexing_threads,
            index_buckets: self.config.index_buckets,
        };
        fill::fill_indexes(&context, tail)
    }
}
