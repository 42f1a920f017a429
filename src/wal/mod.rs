use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::warn;
use parking_lot::{Condvar, Mutex};

use crate::core::error::Result;
use crate::core::types::Tick;
use crate::storage::marker::Marker;

/// Result of submitting a marker: the sequence tick the marker was written
/// under.
#[derive(Debug, Clone, Copy)]
pub struct SlotInfo {
    pub tick: Tick,
}

struct LogFile {
    file: File,
    /// Highest tick appended to the file.
    written: u64,
}

/// Write-ahead log manager. Owns the global tick sequence: every marker
/// submitted through `allocate_and_write` receives the next tick, and
/// revision ids are drawn from the same sequence via `new_tick`.
pub struct LogManager {
    path: PathBuf,
    inner: Mutex<LogFile>,
    current_tick: AtomicU64,
    flushed_tick: Mutex<u64>,
    flushed_cond: Condvar,
    in_recovery: AtomicBool,
}

impl LogManager {
    /// Create or reopen the log at `path`. Reopening replays the existing
    /// frames to restore the tick sequence.
    pub fn open(path: &Path) -> Result<LogManager> {
        let mut last_tick = 0u64;

        if path.exists() {
            let bytes = std::fs::read(path)?;
            let mut offset = 0usize;
            while offset + 4 <= bytes.len() {
                let len = u32::from_le_bytes([
                    bytes[offset],
                    bytes[offset + 1],
                    bytes[offset + 2],
                    bytes[offset + 3],
                ]) as usize;
                if offset + 4 + len > bytes.len() {
                    warn!("ignoring torn tail frame in log '{}'", path.display());
                    break;
                }
                match Marker::decode(&bytes[offset + 4..offset + 4 + len]) {
                    Ok((marker, _)) => {
                        if marker.tick.value() > last_tick {
                            last_tick = marker.tick.value();
                        }
                    }
                    Err(err) => {
                        warn!("ignoring corrupt log frame: {err}");
                        break;
                    }
                }
                offset += 4 + len;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(LogManager {
            path: path.to_path_buf(),
            inner: Mutex::new(LogFile {
                file,
                written: last_tick,
            }),
            current_tick: AtomicU64::new(last_tick),
            flushed_tick: Mutex::new(last_tick),
            flushed_cond: Condvar::new(),
            in_recovery: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Draw the next tick from the global sequence.
    pub fn new_tick(&self) -> Tick {
        Tick(self.current_tick.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn last_tick(&self) -> Tick {
        Tick(self.current_tick.load(Ordering::SeqCst))
    }

    /// Ensure future ticks are greater than `tick`. Used after datafile
    /// replay so the sequence restarts past everything already on disk.
    pub fn advance_to(&self, tick: Tick) {
        self.current_tick.fetch_max(tick.value(), Ordering::SeqCst);
    }

    pub fn is_in_recovery(&self) -> bool {
        self.in_recovery.load(Ordering::Acquire)
    }

    pub fn set_in_recovery(&self, value: bool) {
        self.in_recovery.store(value, Ordering::Release);
    }

    /// Append a marker under a freshly assigned tick. Ticks are assigned and
    /// written under one lock, so the file order matches the tick order.
    pub fn allocate_and_write(&self, marker: &mut Marker, wait_for_sync: bool) -> Result<SlotInfo> {
        let mut inner = self.inner.lock();

        let tick = self.new_tick();
        marker.tick = tick;

        let bytes = marker.encode();
        inner.file.write_all(&(bytes.len() as u32).to_le_bytes())?;
        inner.file.write_all(&bytes)?;
        inner.written = tick.value();

        if wait_for_sync {
            inner.file.sync_all()?;
            let written = inner.written;
            drop(inner);
            self.advance_flushed(written);
        }

        Ok(SlotInfo { tick })
    }

    /// Flush everything appended so far to stable storage.
    pub fn sync(&self) -> Result<()> {
        let inner = self.inner.lock();
        inner.file.sync_all()?;
        let written = inner.written;
        drop(inner);
        self.advance_flushed(written);
        Ok(())
    }

    /// Block until `tick` is durable. Issues a sync if the tick has been
    /// written but not yet flushed.
    pub fn wait_for_tick(&self, tick: Tick) -> Result<()> {
        loop {
            {
                let mut flushed = self.flushed_tick.lock();
                if *flushed >= tick.value() {
                    return Ok(());
                }
                let written = self.inner.lock().written;
                if written < tick.value() {
                    // Not written yet; wait for a writer to catch up.
                    self.flushed_cond.wait(&mut flushed);
                    continue;
                }
            }
            self.sync()?;
        }
    }

    fn advance_flushed(&self, tick: u64) {
        let mut flushed = self.flushed_tick.lock();
        if tick > *flushed {
            *flushed = tick;
            self.flushed_cond.notify_all();
        }
    }
}

impl std::fmt::Debug for LogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogManager")
            .field("path", &self.path)
            .field("current_tick", &self.current_tick.load(Ordering::Relaxed))
            .finish()
    }
}
