use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error};
use parking_lot::RwLock;

use crate::collection::DocumentCollection;
use crate::core::config::CollectionConfig;
use crate::core::error::{Error, Result};
use crate::counter::{CounterAdjustment, CounterManager};
use crate::locks::DeadlockDetector;
use crate::wal::LogManager;

/// Engine root: owns the log manager, the process-wide deadlock detector,
/// the counter manager and all open collections.
pub struct StorageEngine {
    base_dir: PathBuf,
    wal: Arc<LogManager>,
    detector: Arc<DeadlockDetector>,
    counters: CounterManager,
    collections: RwLock<HashMap<String, Arc<DocumentCollection>>>,
}

impl StorageEngine {
    /// Open (or initialize) an engine rooted at `base_dir`, then open every
    /// collection directory found there.
    pub fn open(base_dir: &Path, ignore_errors: bool) -> Result<StorageEngine> {
        std::fs::create_dir_all(base_dir)?;
        let wal = Arc::new(LogManager::open(&base_dir.join("wal.db"))?);
        let counters = CounterManager::open(&base_dir.join("counters.bin"))?;

        let engine = StorageEngine {
            base_dir: base_dir.to_path_buf(),
            wal,
            detector: Arc::new(DeadlockDetector::new()),
            counters,
            collections: RwLock::new(HashMap::new()),
        };
        engine.open_existing_collections(ignore_errors)?;
        Ok(engine)
    }

    fn collection_dir(&self, id: u64) -> PathBuf {
        self.base_dir.join(format!("collection-{id}"))
    }

    fn open_existing_collections(&self, ignore_errors: bool) -> Result<()> {
        for entry in std::fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            let path = entry.path();
            let is_collection = path.is_dir()
                && entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with("collection-")
                && path.join("parameter.json").is_file();
            if !is_collection {
                continue;
            }

            match DocumentCollection::open(
                &path,
                Arc::clone(&self.wal),
                Arc::clone(&self.detector),
                ignore_errors,
            ) {
                Ok(collection) => {
                    debug!("opened collection '{}'", collection.name());
                    self.collections
                        .write()
                        .insert(collection.name().to_string(), Arc::new(collection));
                }
                Err(err) => {
                    error!(
                        "cannot open document collection from path '{}': {err}",
                        path.display()
                    );
                    if !ignore_errors {
                        return Err(err);
                    }
                }
            }
        }
        Ok(())
    }

    /// Create a collection. `config.id` is assigned from the tick sequence
    /// when zero.
    pub fn create_collection(
        &self,
        mut config: CollectionConfig,
    ) -> Result<Arc<DocumentCollection>> {
        if config.name.is_empty() {
            return Err(Error::BadParameter("collection name must not be empty".into()));
        }
        if self.collections.read().contains_key(&config.name) {
            return Err(Error::BadParameter(format!(
                "duplicate collection name '{}'",
                config.name
            )));
        }
        if config.id == 0 {
            config.id = self.wal.new_tick().value();
        }

        let dir = self.collection_dir(config.id);
        let collection = Arc::new(DocumentCollection::create(
            &dir,
            config,
            Arc::clone(&self.wal),
            Arc::clone(&self.detector),
        )?);
        self.collections
            .write()
            .insert(collection.name().to_string(), Arc::clone(&collection));
        Ok(collection)
    }

    pub fn collection(&self, name: &str) -> Option<Arc<DocumentCollection>> {
        self.collections.read().get(name).cloned()
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop a collection and delete its directory. Returns whether a
    /// collection with that name existed.
    pub fn drop_collection(&self, name: &str) -> Result<bool> {
        let Some(collection) = self.collections.write().remove(name) else {
            return Ok(false);
        };
        self.counters.remove_counter(collection.id());
        let dir = self.collection_dir(collection.id());
        drop(collection);
        std::fs::remove_dir_all(dir)?;
        Ok(true)
    }

    /// Garbage-loop hook: give every collection a chance to compact its
    /// cleanup-hungry indexes.
    pub fn cleanup(&self) -> Result<()> {
        let collections: Vec<Arc<DocumentCollection>> =
            self.collections.read().values().cloned().collect();
        for collection in collections {
            collection.cleanup_indexes()?;
        }
        Ok(())
    }

    /// Push current per-collection counts into the counter manager and
    /// persist them.
    pub fn sync_counters(&self, force: bool) -> Result<bool> {
        let collections: Vec<Arc<DocumentCollection>> =
            self.collections.read().values().cloned().collect();

        for collection in collections {
            let stored = self.counters.load_counter(collection.id());
            let figures = collection.figures();
            let count = figures.number_documents;

            let adjustment = CounterAdjustment {
                sequence: self.wal.last_tick(),
                added: count.saturating_sub(stored.count),
                removed: stored.count.saturating_sub(count),
                revision: crate::core::types::Tick(figures.tick_max),
            };
            self.counters.update_counter(collection.id(), &adjustment);
        }
        self.counters.sync(force)
    }

    pub fn counters(&self) -> &CounterManager {
        &self.counters
    }

    pub fn wal(&self) -> &Arc<LogManager> {
        &self.wal
    }

    pub fn deadlock_detector(&self) -> &Arc<DeadlockDetector> {
        &self.detector
    }
}
