//! The persistent tier handle and its configuration.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::CacheError;
use crate::compaction::{CompactionSchedule, CompactionState, CompactionStats, Compactor};
use crate::log::{PersistentLog, Tier};
use crate::worker::Worker;

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for a [`DiskCache`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Slots in the hot ring of recently read values.
    ///
    /// Default: 1024. Must be ≥ 1.
    pub ring_capacity: usize,

    /// Number of keys the bloom filter is sized for. The filter is sized for
    /// the live key count instead when that is larger.
    ///
    /// Default: 1 000 000. Must be ≥ 1.
    pub bloom_expected_items: usize,

    /// Target false-positive rate of the bloom filter.
    ///
    /// Default: 0.01. Must be in `(0, 1)`.
    pub bloom_false_positive_rate: f64,

    /// `fsync` the log and the deletion ledger after every write.
    ///
    /// Default: `false`.
    pub sync_writes: bool,

    /// Background compaction schedule. `None` disables the background
    /// compactor; [`DiskCache::compact`] still works.
    ///
    /// Default: daily at 03:00:00 local time.
    pub compaction: Option<CompactionSchedule>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 1024,
            bloom_expected_items: 1_000_000,
            bloom_false_positive_rate: 0.01,
            sync_writes: false,
            compaction: Some(CompactionSchedule::default()),
        }
    }
}

impl LogConfig {
    fn validate(&self) -> Result<(), CacheError> {
        if self.ring_capacity < 1 {
            return Err(CacheError::InvalidConfig("ring_capacity must be >= 1".into()));
        }
        if self.bloom_expected_items < 1 {
            return Err(CacheError::InvalidConfig(
                "bloom_expected_items must be >= 1".into(),
            ));
        }
        if !(self.bloom_false_positive_rate > 0.0 && self.bloom_false_positive_rate < 1.0) {
            return Err(CacheError::InvalidConfig(
                "bloom_false_positive_rate must be in (0, 1)".into(),
            ));
        }
        if let Some(schedule) = &self.compaction {
            schedule.validate().map_err(CacheError::InvalidConfig)?;
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// DiskCache handle
// ------------------------------------------------------------------------------------------------

/// A byte-oriented key-value store backed by an append-only log file.
///
/// Writes append a record; deletes flip the record's flag byte in place.
/// Recently read values are served from a small in-memory ring, and a
/// compactor periodically rewrites the log without its dead records.
///
/// Keys may not contain `' '` or `'\n'`, values may not contain `'\n'`.
///
/// `DiskCache` is `Send + Sync`; share it across threads with `Arc<DiskCache>`.
///
/// The log and ledger files stay open until the handle is dropped, even
/// after [`close`](Self::close).
pub struct DiskCache {
    log: Arc<PersistentLog>,
    compactor: Arc<Compactor>,
    worker: Mutex<Option<Worker>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("path", &self.log.path)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl DiskCache {
    /// Opens the store in `dir`, creating it if needed.
    ///
    /// Existing records are replayed into the index, a torn trailing record
    /// is truncated, and deletes journaled before a crash are re-applied.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidConfig`] for out-of-range settings and
    /// [`CacheError::Io`] if the directory or files cannot be opened.
    pub fn open(dir: impl AsRef<Path>, config: LogConfig) -> Result<Self, CacheError> {
        config.validate()?;

        let log = Arc::new(PersistentLog::open(dir.as_ref(), &config)?);
        let compactor = Arc::new(Compactor::new(Arc::clone(&log)));

        let worker = match config.compaction {
            Some(schedule) => Some(Arc::clone(&compactor).spawn(schedule)?),
            None => None,
        };

        info!(
            dir = %dir.as_ref().display(),
            scheduled = worker.is_some(),
            "disk cache opened"
        );

        Ok(Self {
            log,
            compactor,
            worker: Mutex::new(worker),
            closed: AtomicBool::new(false),
        })
    }

    /// Stores `value` under `key`, replacing any earlier value.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidArgument`] if the key is empty or contains
    /// `' '` or `'\n'`, or if the value contains `'\n'`.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<(), CacheError> {
        self.check_open()?;
        Ok(self.log.set(key, value)?)
    }

    /// Returns the value stored under `key`, or [`CacheError::NotFound`].
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, CacheError> {
        self.check_open()?;
        Ok(self.log.get(key)?)
    }

    /// Deletes `key`. Deleting an absent key is not an error.
    pub fn delete(&self, key: &[u8]) -> Result<(), CacheError> {
        self.check_open()?;
        Ok(self.log.delete(key)?)
    }

    /// Live keys on disk, or values held in the hot ring.
    pub fn size(&self, tier: Tier) -> Result<usize, CacheError> {
        self.check_open()?;
        Ok(self.log.size(tier)?)
    }

    /// Compacts the log now.
    ///
    /// Returns `Ok(None)` if a compaction is already running.
    pub fn compact(&self) -> Result<Option<CompactionStats>, CacheError> {
        self.check_open()?;
        Ok(self.compactor.run_once()?)
    }

    /// Whether a compaction is running right now.
    pub fn compaction_state(&self) -> CompactionState {
        self.compactor.state()
    }

    /// Removes every key from disk and memory.
    pub fn clear(&self) -> Result<(), CacheError> {
        self.check_open()?;
        Ok(self.log.clear()?)
    }

    /// Flushes the log and the deletion ledger to disk.
    pub fn sync(&self) -> Result<(), CacheError> {
        self.check_open()?;
        Ok(self.log.sync()?)
    }

    /// Stops the background compactor, waiting for a running compaction to
    /// finish, and syncs the log.
    ///
    /// Subsequent operations return [`CacheError::Closed`]. Calling `close`
    /// more than once is harmless. The files are closed when the handle is
    /// dropped; drop it before reopening the same directory.
    pub fn close(&self) -> Result<(), CacheError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.stop_worker()?;
        self.log.sync()?;
        info!(path = %self.log.path.display(), "disk cache closed");
        Ok(())
    }

    fn stop_worker(&self) -> Result<(), CacheError> {
        let worker = self
            .worker
            .lock()
            .map_err(|_| CacheError::Internal("Mutex poisoned".into()))?
            .take();
        if let Some(mut worker) = worker {
            worker.stop();
        }
        Ok(())
    }

    fn check_open(&self) -> Result<(), CacheError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        Ok(())
    }
}

impl Drop for DiskCache {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            let _ = self.stop_worker();
        }
    }
}
