use std::collections::{HashMap, HashSet};
use std::thread::ThreadId;

use log::trace;
use parking_lot::Mutex;

use crate::core::error::{Error, Result};

/// Hard ceiling applied when a caller passes `timeout == 0`: waiting is
/// limited to 15 minutes.
pub const MAX_LOCK_TIMEOUT_MICROS: u64 = 15 * 60 * 1000 * 1000;

/// Default sleep period between lock attempts.
pub const DEFAULT_SLEEP_PERIOD_MICROS: u64 = 1000;

/// A blocked waiter re-runs the deadlock probe every this many iterations.
pub const DEADLOCK_PROBE_ITERATIONS: u32 = 5;

/// How an operation treats the collection lock. `AlreadyLocked` is for
/// callers that have serialized the collection externally: acquisition is
/// immediate and skips waiter-graph registration, timeouts and probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockPolicy {
    #[default]
    Lock,
    AlreadyLocked,
}

#[derive(Debug, Default)]
struct DetectorState {
    /// Threads holding the read lock, per collection.
    readers: HashMap<u64, HashSet<ThreadId>>,
    /// Threads holding the write lock, per collection.
    writers: HashMap<u64, HashSet<ThreadId>>,
    /// Threads blocked waiting for a read lock, with the collection waited on.
    blocked_readers: HashMap<ThreadId, u64>,
    /// Threads blocked waiting for a write lock.
    blocked_writers: HashMap<ThreadId, u64>,
}

impl DetectorState {
    fn blocked_on(&self, thread: ThreadId) -> Option<(u64, bool)> {
        if let Some(&collection) = self.blocked_writers.get(&thread) {
            return Some((collection, true));
        }
        self.blocked_readers
            .get(&thread)
            .map(|&collection| (collection, false))
    }

    /// Depth-first search over `blocked -> held-by -> blocked`: does any
    /// chain of holders starting at `start`'s wanted collection lead back to
    /// `start`?
    fn would_deadlock(&self, start: ThreadId) -> bool {
        let mut stack = vec![start];
        let mut visited: HashSet<ThreadId> = HashSet::new();

        while let Some(thread) = stack.pop() {
            let Some((collection, wants_write)) = self.blocked_on(thread) else {
                continue;
            };

            let mut holders: Vec<ThreadId> = Vec::new();
            if let Some(writers) = self.writers.get(&collection) {
                holders.extend(writers.iter().copied());
            }
            if wants_write {
                // A prospective writer is also blocked by every reader.
                if let Some(readers) = self.readers.get(&collection) {
                    holders.extend(readers.iter().copied());
                }
            }

            for holder in holders {
                if holder == thread {
                    continue;
                }
                if holder == start {
                    return true;
                }
                if visited.insert(holder) {
                    stack.push(holder);
                }
            }
        }

        false
    }
}

/// Process-wide waiter graph over collection locks. Every contended timed
/// acquisition registers here; cycles surface as `Deadlock` at one waiter.
#[derive(Debug, Default)]
pub struct DeadlockDetector {
    state: Mutex<DetectorState>,
}

impl DeadlockDetector {
    pub fn new() -> DeadlockDetector {
        DeadlockDetector::default()
    }

    /// Register the current thread as an active reader of `collection`.
    /// `was_blocked` clears a previous blocked registration atomically.
    pub fn add_reader(&self, collection: u64, was_blocked: bool) {
        let me = std::thread::current().id();
        let mut state = self.state.lock();
        if was_blocked {
            state.blocked_readers.remove(&me);
        }
        state.readers.entry(collection).or_default().insert(me);
    }

    pub fn unset_reader(&self, collection: u64) {
        let me = std::thread::current().id();
        let mut state = self.state.lock();
        if let Some(readers) = state.readers.get_mut(&collection) {
            readers.remove(&me);
            if readers.is_empty() {
                state.readers.remove(&collection);
            }
        }
    }

    /// Register the current thread as the active writer of `collection`.
    pub fn add_writer(&self, collection: u64, was_blocked: bool) {
        let me = std::thread::current().id();
        let mut state = self.state.lock();
        if was_blocked {
            state.blocked_writers.remove(&me);
        }
        state.writers.entry(collection).or_default().insert(me);
    }

    pub fn unset_writer(&self, collection: u64) {
        let me = std::thread::current().id();
        let mut state = self.state.lock();
        if let Some(writers) = state.writers.get_mut(&collection) {
            writers.remove(&me);
            if writers.is_empty() {
                state.writers.remove(&collection);
            }
        }
    }

    /// Mark the current thread as blocked waiting to read `collection`.
    /// Fails with `Deadlock` when the registration itself closes a cycle.
    pub fn set_reader_blocked(&self, collection: u64) -> Result<()> {
        let me = std::thread::current().id();
        let mut state = self.state.lock();
        state.blocked_readers.insert(me, collection);
        if state.would_deadlock(me) {
            state.blocked_readers.remove(&me);
            trace!("deadlock detected while registering reader for collection {collection}");
            return Err(Error::Deadlock);
        }
        Ok(())
    }

    pub fn unset_reader_blocked(&self) {
        let me = std::thread::current().id();
        self.state.lock().blocked_readers.remove(&me);
    }

    /// Mark the current thread as blocked waiting to write `collection`.
    pub fn set_writer_blocked(&self, collection: u64) -> Result<()> {
        let me = std::thread::current().id();
        let mut state = self.state.lock();
        state.blocked_writers.insert(me, collection);
        if state.would_deadlock(me) {
            state.blocked_writers.remove(&me);
            trace!("deadlock detected while registering writer for collection {collection}");
            return Err(Error::Deadlock);
        }
        Ok(())
    }

    pub fn unset_writer_blocked(&self) {
        let me = std::thread::current().id();
        self.state.lock().blocked_writers.remove(&me);
    }

    /// Re-run the cycle probe for the current (already registered) waiter.
    pub fn detect_deadlock(&self) -> Result<()> {
        let me = std::thread::current().id();
        let state = self.state.lock();
        if state.would_deadlock(me) {
            trace!("deadlock detected during periodic probe");
            return Err(Error::Deadlock);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn no_cycle_without_cross_waiting() {
        let detector = DeadlockDetector::new();
        detector.add_writer(1, false);
        detector.set_writer_blocked(2).unwrap();
        detector.detect_deadlock().unwrap();
        detector.unset_writer_blocked();
        detector.unset_writer(1);
    }

    #[test]
    fn cross_waiting_writers_form_a_cycle() {
        let detector = Arc::new(DeadlockDetector::new());

        // This thread holds C1 and waits for C2.
        detector.add_writer(1, false);
        detector.set_writer_blocked(2).unwrap();

        // A second thread holds C2 and tries to wait for C1: cycle.
        let other = {
            let detector = Arc::clone(&detector);
            std::thread::spawn(move || {
                detector.add_writer(2, false);
                detector.set_writer_blocked(1)
            })
        };

        let result = other.join().unwrap();
        assert!(matches!(result, Err(Error::Deadlock)));
    }

    #[test]
    fn reader_blocks_prospective_writer_only() {
        let detector = Arc::new(DeadlockDetector::new());

        // This thread reads C1 and waits to read C2; readers do not block
        // readers, so no cycle can involve this edge.
        detector.add_reader(1, false);
        detector.set_reader_blocked(2).unwrap();

        let other = {
            let detector = Arc::clone(&detector);
            std::thread::spawn(move || {
                detector.add_reader(2, false);
                // Reading C1 is compatible with the existing reader.
                detector.set_reader_blocked(1)
            })
        };
        assert!(other.join().unwrap().is_ok());
    }
}
