//! # Persistent Log
//!
//! The durable tier: an append-only record file with an in-memory
//! **offset index**, a **bloom filter** of written keys, a [`HotRing`] of
//! recently read values, and the [`DeletionLedger`].
//!
//! ## Read path
//!
//! ```text
//! get(key)
//!   ├─ hot ring hit ───────────────────────────────> value
//!   ├─ bloom says absent ──────────────────────────> NotFound (no I/O)
//!   ├─ no offset in index ─────────────────────────> NotFound
//!   └─ seek(offset), verify "1#<key> ", read line ─> value, cached in ring
//! ```
//!
//! ## Write path
//!
//! - `set` appends `1#<key> <value>\n` at the end of the file, points the
//!   index at the new offset, marks the bloom filter, and drops any ring copy.
//! - `delete` journals `(offset, key)` in the ledger, removes the key from
//!   the index and ring, then flips the flag byte at `offset` to `0`. A flip
//!   that fails is logged; the ledger entry makes the delete stick on the
//!   next open or compaction.
//!
//! ## Locking
//!
//! `index (RwLock) -> file (Mutex) -> ring / ledger (Mutex)`. Nothing takes
//! these in another order. `maintenance` serializes whole-file rewrites
//! (compaction, clear) and is taken before everything else.
//!
//! ## Recovery
//!
//! [`PersistentLog::open`] rebuilds the index by replaying the file: a live
//! record points its key at itself, a deleted record removes its key. A torn
//! final line is truncated away. Ledger entries whose offset is still the
//! live offset of their key are re-applied, and a fresh ledger epoch is
//! started. The bloom filter is rebuilt from the surviving keys.

pub(crate) mod record;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bloomfilter::Bloom;
use memmap2::Mmap;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::disk::LogConfig;
use crate::hash::hash_key;
use crate::ledger::DeletionLedger;
use crate::ring::HotRing;
use record::{DELETED, RecordIter};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

pub(crate) const LOG_FILE_NAME: &str = "ringcache.log";
pub(crate) const COMPACT_FILE_NAME: &str = "ringcache.log.compact";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LogError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Key absent, deleted, or never written.
    #[error("Key not found")]
    NotFound,

    /// Key or value would break the line format.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A record on disk does not match what the index says is there.
    #[error("Corrupted log: {0}")]
    Corruption(String),

    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Which tier [`PersistentLog::size`] reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Live keys in the on-disk log.
    Disk,
    /// Values held in the hot ring.
    Memory,
}

// ------------------------------------------------------------------------------------------------
// LogIndex
// ------------------------------------------------------------------------------------------------

/// Key hash to record offset, plus a bloom filter over the same hashes.
///
/// The filter only ever gains members between rebuilds, so it may claim a
/// deleted key is present; the offset map settles it.
pub(crate) struct LogIndex {
    pub(crate) offsets: HashMap<u64, u64>,
    pub(crate) bloom: Bloom<u64>,
}

impl LogIndex {
    /// Sizes the filter for `expected_items`, or for the live key count when
    /// that is larger.
    pub(crate) fn build(
        offsets: HashMap<u64, u64>,
        expected_items: usize,
        false_positive_rate: f64,
    ) -> Result<Self, LogError> {
        let items = expected_items.max(offsets.len());
        let mut bloom = Bloom::new_for_fp_rate(items, false_positive_rate)
            .map_err(|e| LogError::Internal(e.to_string()))?;
        for hash in offsets.keys() {
            bloom.set(hash);
        }
        Ok(Self { offsets, bloom })
    }
}

// ------------------------------------------------------------------------------------------------
// PersistentLog
// ------------------------------------------------------------------------------------------------

pub(crate) struct PersistentLog {
    pub(crate) path: PathBuf,
    pub(crate) compact_path: PathBuf,
    pub(crate) index: RwLock<LogIndex>,
    pub(crate) file: Mutex<File>,
    pub(crate) ring: Mutex<HotRing<Vec<u8>>>,
    pub(crate) ledger: Mutex<DeletionLedger>,
    pub(crate) maintenance: Mutex<()>,
    pub(crate) bloom_expected_items: usize,
    pub(crate) bloom_false_positive_rate: f64,
    sync_writes: bool,
    /// Makes the next compaction fail to publish its output.
    #[cfg(test)]
    pub(crate) fail_next_publish: std::sync::atomic::AtomicBool,
}

impl PersistentLog {
    /// Opens or creates the log under `dir` and recovers its index.
    pub(crate) fn open(dir: &Path, config: &LogConfig) -> Result<Self, LogError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(LOG_FILE_NAME);
        let compact_path = dir.join(COMPACT_FILE_NAME);

        if compact_path.exists() {
            warn!(path = %compact_path.display(), "removing unfinished compaction output");
            fs::remove_file(&compact_path)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let (mut offsets, valid_len, file_len) = replay(&file)?;
        if valid_len < file_len {
            warn!(
                valid_len,
                file_len, "truncating torn record at the end of the log"
            );
            file.set_len(valid_len)?;
        }

        let (mut ledger, entries) = DeletionLedger::open(dir, config.sync_writes)?;
        let mut reapplied = 0usize;
        for entry in &entries {
            let hash = hash_key(&entry.key);
            if offsets.get(&hash) == Some(&entry.offset) {
                flip_to_deleted(&mut file, entry.offset)?;
                offsets.remove(&hash);
                reapplied += 1;
            }
        }
        if reapplied > 0 || valid_len < file_len {
            file.sync_all()?;
        }
        if reapplied > 0 {
            info!(reapplied, "re-applied journaled deletes");
        }
        // Journaled deletes are now on disk; the next epoch starts empty.
        ledger.rotate()?;

        let live = offsets.len();
        let index = LogIndex::build(
            offsets,
            config.bloom_expected_items,
            config.bloom_false_positive_rate,
        )?;

        info!(path = %path.display(), live, "persistent log opened");

        Ok(Self {
            path,
            compact_path,
            index: RwLock::new(index),
            file: Mutex::new(file),
            ring: Mutex::new(HotRing::new(config.ring_capacity)),
            ledger: Mutex::new(ledger),
            maintenance: Mutex::new(()),
            bloom_expected_items: config.bloom_expected_items,
            bloom_false_positive_rate: config.bloom_false_positive_rate,
            sync_writes: config.sync_writes,
            #[cfg(test)]
            fail_next_publish: std::sync::atomic::AtomicBool::new(false),
        })
    }

    // --------------------------------------------------------------------------------------------
    // Foreground operations
    // --------------------------------------------------------------------------------------------

    /// Appends a live record for `key`, superseding any earlier one.
    pub(crate) fn set(&self, key: &[u8], value: &[u8]) -> Result<(), LogError> {
        record::check_key(key).map_err(|e| LogError::InvalidArgument(e.into()))?;
        record::check_value(value).map_err(|e| LogError::InvalidArgument(e.into()))?;

        let hash = hash_key(key);
        let line = record::encode(key, value);

        let mut index = self.write_index()?;
        let offset = {
            let mut file = self.lock_file()?;
            let offset = file.seek(SeekFrom::End(0))?;
            if let Err(e) = file.write_all(&line) {
                // Drop the partial line so the next append starts clean.
                if let Err(trunc) = file.set_len(offset) {
                    error!(offset, "failed to roll back partial append: {trunc}");
                }
                return Err(e.into());
            }
            if self.sync_writes {
                file.sync_data()?;
            }
            offset
        };

        index.offsets.insert(hash, offset);
        index.bloom.set(&hash);
        self.lock_ring()?.remove(hash);

        trace!(offset, len = line.len(), "record appended");
        Ok(())
    }

    /// Returns the value of `key`.
    pub(crate) fn get(&self, key: &[u8]) -> Result<Vec<u8>, LogError> {
        record::check_key(key).map_err(|e| LogError::InvalidArgument(e.into()))?;
        let hash = hash_key(key);

        if let Some(value) = self.lock_ring()?.get(hash) {
            trace!("hot ring hit");
            return Ok(value);
        }

        let index = self.read_index()?;
        if !index.bloom.check(&hash) {
            return Err(LogError::NotFound);
        }
        let Some(&offset) = index.offsets.get(&hash) else {
            return Err(LogError::NotFound);
        };

        let value = {
            let mut file = self.lock_file()?;
            read_value(&mut file, offset, key)?
        };

        // Still under the index lock: a racing delete cannot slip in between.
        self.lock_ring()?.set(hash, value.clone());
        Ok(value)
    }

    /// Tombstones the current record of `key`. Missing keys are a no-op.
    pub(crate) fn delete(&self, key: &[u8]) -> Result<(), LogError> {
        record::check_key(key).map_err(|e| LogError::InvalidArgument(e.into()))?;
        let hash = hash_key(key);

        let mut index = self.write_index()?;
        let Some(&offset) = index.offsets.get(&hash) else {
            return Ok(());
        };

        let mut file = self.lock_file()?;
        if !record_matches(&mut file, offset, key)? {
            // Another key with the same digest owns this slot.
            return Ok(());
        }

        self.lock_ledger()?.record(offset, key)?;
        index.offsets.remove(&hash);
        self.lock_ring()?.remove(hash);

        let flipped = flip_to_deleted(&mut file, offset).and_then(|()| {
            if self.sync_writes {
                file.sync_data()?;
            }
            Ok(())
        });
        if let Err(e) = flipped {
            warn!(offset, "tombstone flip failed, ledger keeps the delete: {e}");
        }

        trace!(offset, "record deleted");
        Ok(())
    }

    /// Number of live keys on disk, or of values in the hot ring.
    pub(crate) fn size(&self, tier: Tier) -> Result<usize, LogError> {
        match tier {
            Tier::Disk => Ok(self.read_index()?.offsets.len()),
            Tier::Memory => Ok(self.lock_ring()?.len()),
        }
    }

    /// Drops every record: truncates the file and resets index, bloom
    /// filter, hot ring and ledger.
    pub(crate) fn clear(&self) -> Result<(), LogError> {
        let _maintenance = self.lock_maintenance()?;
        let mut index = self.write_index()?;
        let mut file = self.lock_file()?;

        file.set_len(0)?;
        file.sync_all()?;
        index.offsets.clear();
        index.bloom.clear();
        self.lock_ring()?.clear();
        self.lock_ledger()?.rotate()?;

        info!(path = %self.path.display(), "persistent log cleared");
        Ok(())
    }

    /// Flushes the log and the ledger to disk.
    pub(crate) fn sync(&self) -> Result<(), LogError> {
        self.lock_file()?.sync_all()?;
        self.lock_ledger()?.sync()?;
        debug!("persistent log synced");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Lock helpers
    // --------------------------------------------------------------------------------------------

    pub(crate) fn read_index(&self) -> Result<RwLockReadGuard<'_, LogIndex>, LogError> {
        self.index
            .read()
            .map_err(|_| LogError::Internal("RwLock poisoned".into()))
    }

    pub(crate) fn write_index(&self) -> Result<RwLockWriteGuard<'_, LogIndex>, LogError> {
        self.index
            .write()
            .map_err(|_| LogError::Internal("RwLock poisoned".into()))
    }

    pub(crate) fn lock_file(&self) -> Result<MutexGuard<'_, File>, LogError> {
        self.file
            .lock()
            .map_err(|_| LogError::Internal("Mutex poisoned".into()))
    }

    pub(crate) fn lock_ring(&self) -> Result<MutexGuard<'_, HotRing<Vec<u8>>>, LogError> {
        self.ring
            .lock()
            .map_err(|_| LogError::Internal("Mutex poisoned".into()))
    }

    pub(crate) fn lock_ledger(&self) -> Result<MutexGuard<'_, DeletionLedger>, LogError> {
        self.ledger.lock().map_err(|_| {
            error!("Mutex poisoned");
            LogError::Internal("Mutex poisoned".into())
        })
    }

    pub(crate) fn lock_maintenance(&self) -> Result<MutexGuard<'_, ()>, LogError> {
        self.maintenance
            .lock()
            .map_err(|_| LogError::Internal("Mutex poisoned".into()))
    }
}

impl Drop for PersistentLog {
    fn drop(&mut self) {
        match self.file.lock() {
            Ok(file) => {
                if let Err(e) = file.sync_all() {
                    error!("Failed to sync log on drop: {}", e);
                }
            }
            Err(poisoned) => {
                if let Err(e) = poisoned.into_inner().sync_all() {
                    error!("Failed to sync log (poisoned) on drop: {}", e);
                }
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// File helpers
// ------------------------------------------------------------------------------------------------

/// Rebuilds the offset map from the file contents.
///
/// Returns `(offsets, valid_len, file_len)` where `valid_len` is the end of
/// the last complete line.
///
/// # Safety
///
/// The file is mapped read-only while the log is being opened, before any
/// handle that could write to it is shared. The mapping is dropped before
/// this function returns.
fn replay(file: &File) -> Result<(HashMap<u64, u64>, u64, u64), LogError> {
    let file_len = file.metadata()?.len();
    let mut offsets = HashMap::new();
    if file_len == 0 {
        return Ok((offsets, 0, 0));
    }

    let mmap = unsafe { Mmap::map(file)? };
    let mut records = RecordIter::new(&mmap);
    let mut malformed = 0usize;

    for item in records.by_ref() {
        match item {
            Ok((offset, record)) => {
                let hash = hash_key(record.key);
                if record.live {
                    offsets.insert(hash, offset);
                } else {
                    offsets.remove(&hash);
                }
            }
            Err(e) => {
                warn!("{e}");
                malformed += 1;
            }
        }
    }

    let valid_len = records.consumed();
    debug!(
        live = offsets.len(),
        malformed, valid_len, "log replay finished"
    );
    Ok((offsets, valid_len, file_len))
}

/// Writes the deleted flag over the first byte of the record at `offset`.
pub(crate) fn flip_to_deleted(file: &mut File, offset: u64) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(&[DELETED])
}

/// Checks that the record at `offset` is a live record of `key`.
fn record_matches(file: &mut File, offset: u64, key: &[u8]) -> Result<bool, LogError> {
    let expected = record::live_header(key);
    let mut header = vec![0u8; expected.len()];
    file.seek(SeekFrom::Start(offset))?;
    match file.read_exact(&mut header) {
        Ok(()) => Ok(header == expected),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(LogError::Corruption(format!(
            "record at offset {offset} is cut short"
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Reads the value of the live record of `key` at `offset`.
fn read_value(file: &mut File, offset: u64, key: &[u8]) -> Result<Vec<u8>, LogError> {
    if !record_matches(file, offset, key)? {
        // Either a digest collision or an index pointing at the wrong record.
        let mut first = [0u8; 1];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut first)?;
        if first[0] == DELETED {
            return Err(LogError::Corruption(format!(
                "index points at deleted record at offset {offset}"
            )));
        }
        return Err(LogError::NotFound);
    }

    let mut value = Vec::new();
    let mut reader = BufReader::new(file);
    reader.read_until(b'\n', &mut value)?;
    if value.pop() != Some(b'\n') {
        return Err(LogError::Corruption(format!(
            "record at offset {offset} has no line terminator"
        )));
    }
    Ok(value)
}
