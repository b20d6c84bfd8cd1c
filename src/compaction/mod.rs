//! # Compaction Module
//!
//! Rewrites the record log without its dead records, online, while
//! foreground reads, writes and deletes keep running.
//!
//! ## States
//!
//! The [`Compactor`] is either **Idle** or **Compacting**. A run requested
//! while another is in progress is skipped, not queued.
//!
//! ## Algorithm
//!
//! **Phase 1 (shared).** Under short locks, snapshot the offset index, the
//! log length, and the epoch's pending deletes. Then, with no lock held, read
//! the snapshot range through a second read-only handle and copy a record to
//! `ringcache.log.compact` only if:
//!
//! - its flag byte is `1`,
//! - `(key, offset)` is not a pending delete of this epoch,
//! - the snapshot index points the key at exactly this offset.
//!
//! The last rule drops superseded duplicates. Every copied record's
//! `old offset -> new offset` is kept in a relocation table.
//!
//! **Phase 2 (exclusive).** Take the index write lock and the file lock,
//! which parks foreground writers. Then:
//!
//! 1. Copy the records appended since the snapshot, filtered against the
//!    current index.
//! 2. Flip to `0` in the output every relocated record that is no longer the
//!    live offset of its key (deleted or overwritten during phase 1).
//! 3. Map the current index through the relocation table and build a fresh
//!    bloom filter. A live offset missing from the table aborts the run.
//! 4. Write every pending delete's flag byte in the old file once more and
//!    fsync it, so the old file alone carries the epoch's deletes.
//! 5. Prepare the next ledger epoch, fsync the output, and rename it over the
//!    log.
//!
//! A failed rename removes the output and the prepared ledger file. The old
//! file, index and pending deletes stay as they were. On success the output
//! handle becomes the log handle, the new index is swapped in, and the ledger
//! epoch advances. Values in the hot ring are unaffected.

pub mod schedule;

#[cfg(test)]
mod tests;

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crossbeam::channel::{after, select};
use tracing::{debug, error, info, warn};

use crate::hash::hash_key;
use crate::log::record::{self, DELETED};
use crate::log::{LogError, LogIndex, PersistentLog};
use crate::worker::Worker;
pub use schedule::CompactionSchedule;

// ------------------------------------------------------------------------------------------------
// Shared types
// ------------------------------------------------------------------------------------------------

/// Outcome of one compaction run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Complete lines read from the old log.
    pub records_scanned: u64,
    /// Records carried into the new log.
    pub records_kept: u64,
    /// Records left behind: deleted, superseded, or malformed.
    pub records_dropped: u64,
    /// Log size before the run.
    pub bytes_before: u64,
    /// Log size after the run.
    pub bytes_after: u64,
}

/// Whether a compaction is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionState {
    Idle,
    Compacting,
}

/// Where a copied record came from, and which key it belongs to.
#[derive(Debug, Clone, Copy)]
struct Relocation {
    new_offset: u64,
    hash: u64,
}

/// Output side of a run: the temp file and what has been written to it.
struct Output {
    writer: BufWriter<File>,
    len: u64,
    relocations: HashMap<u64, Relocation>,
}

impl Output {
    fn push(&mut self, old_offset: u64, hash: u64, line: &[u8]) -> io::Result<()> {
        self.writer.write_all(line)?;
        self.relocations.insert(
            old_offset,
            Relocation {
                new_offset: self.len,
                hash,
            },
        );
        self.len += line.len() as u64;
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Compactor
// ------------------------------------------------------------------------------------------------

/// Runs compactions of one log, at most one at a time.
pub(crate) struct Compactor {
    log: Arc<PersistentLog>,
    compacting: AtomicBool,
}

impl Compactor {
    pub(crate) fn new(log: Arc<PersistentLog>) -> Self {
        Self {
            log,
            compacting: AtomicBool::new(false),
        }
    }

    pub(crate) fn state(&self) -> CompactionState {
        if self.compacting.load(Ordering::Acquire) {
            CompactionState::Compacting
        } else {
            CompactionState::Idle
        }
    }

    /// Runs one compaction. Returns `Ok(None)` if one is already running.
    pub(crate) fn run_once(&self) -> Result<Option<CompactionStats>, LogError> {
        if self.compacting.swap(true, Ordering::AcqRel) {
            debug!("compaction already running, skipped");
            return Ok(None);
        }
        let result = compact_log(&self.log);
        self.compacting.store(false, Ordering::Release);
        result.map(Some)
    }

    /// Starts the scheduled loop on its own thread.
    ///
    /// Failures are logged and the loop waits for the next occurrence.
    pub(crate) fn spawn(self: Arc<Self>, schedule: CompactionSchedule) -> io::Result<Worker> {
        Worker::spawn("ringcache-compactor", move |shutdown| {
            loop {
                let delay = schedule.delay_from_now();
                debug!(delay_secs = delay.as_secs(), "next compaction scheduled");
                select! {
                    recv(shutdown) -> _ => break,
                    recv(after(delay)) -> _ => {
                        match self.run_once() {
                            Ok(Some(stats)) => debug!(?stats, "scheduled compaction finished"),
                            Ok(None) => {}
                            Err(e) => error!("scheduled compaction failed: {e}"),
                        }
                    }
                }
            }
        })
    }
}

// ------------------------------------------------------------------------------------------------
// Compaction run
// ------------------------------------------------------------------------------------------------

/// Rewrites `log` without its dead records. See the module docs.
pub(crate) fn compact_log(log: &PersistentLog) -> Result<CompactionStats, LogError> {
    let started = Instant::now();
    let _maintenance = log.lock_maintenance()?;

    // Phase 1: snapshot.
    let (snapshot, snapshot_len, pending) = {
        let index = log.read_index()?;
        let file = log.lock_file()?;
        let len = file.metadata()?.len();
        let pending = log.lock_ledger()?.pending().clone();
        (index.offsets.clone(), len, pending)
    };

    let temp = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&log.compact_path)?;
    let mut output = Output {
        writer: BufWriter::new(temp),
        len: 0,
        relocations: HashMap::with_capacity(snapshot.len()),
    };
    let mut stats = CompactionStats::default();

    let copied = File::open(&log.path)
        .map(|source| BufReader::new(source.take(snapshot_len)))
        .and_then(|reader| {
            copy_live(reader, 0, &snapshot, &pending, &mut output, &mut stats)
        });
    if let Err(e) = copied {
        discard(log, output);
        return Err(e.into());
    }

    // Phase 2: exclusive.
    let mut index = log.write_index()?;
    let mut file = log.lock_file()?;

    match finish(log, &mut index, &mut file, snapshot_len, &pending, output, &mut stats) {
        Ok(bytes_before) => {
            stats.bytes_before = bytes_before;
            info!(
                scanned = stats.records_scanned,
                kept = stats.records_kept,
                dropped = stats.records_dropped,
                bytes_before = stats.bytes_before,
                bytes_after = stats.bytes_after,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "compaction applied"
            );
            Ok(stats)
        }
        Err(e) => {
            warn!("compaction aborted: {e}");
            Err(e)
        }
    }
}

/// Phase 2 body. On error the output file is removed and nothing else changes.
fn finish(
    log: &PersistentLog,
    index: &mut LogIndex,
    file: &mut File,
    snapshot_len: u64,
    pending: &HashSet<(u64, u64)>,
    mut output: Output,
    stats: &mut CompactionStats,
) -> Result<u64, LogError> {
    let current_len = file.metadata()?.len();

    // 1. Records appended during phase 1.
    if current_len > snapshot_len {
        let copied = file
            .seek(SeekFrom::Start(snapshot_len))
            .and_then(|_| {
                let reader = BufReader::new((&mut *file).take(current_len - snapshot_len));
                copy_live(reader, snapshot_len, &index.offsets, pending, &mut output, stats)
            });
        if let Err(e) = copied {
            discard(log, output);
            return Err(e.into());
        }
    }

    let Output {
        writer,
        len: new_len,
        relocations,
    } = output;
    let mut temp = match writer.into_inner() {
        Ok(temp) => temp,
        Err(e) => {
            remove_output(log);
            return Err(e.into_error().into());
        }
    };

    // 2 + 3. Flip stale copies, then translate the live index.
    let prepared = flip_stale(&mut temp, &relocations, &index.offsets).and_then(|()| {
        let mut offsets = HashMap::with_capacity(index.offsets.len());
        for (&hash, &old) in &index.offsets {
            match relocations.get(&old) {
                Some(r) if r.hash == hash => {
                    offsets.insert(hash, r.new_offset);
                }
                _ => {
                    return Err(LogError::Internal(format!(
                        "live record at offset {old} was not carried over"
                    )));
                }
            }
        }
        LogIndex::build(
            offsets,
            log.bloom_expected_items,
            log.bloom_false_positive_rate,
        )
    });
    let new_index = match prepared {
        Ok(new_index) => new_index,
        Err(e) => {
            drop(temp);
            remove_output(log);
            return Err(e);
        }
    };

    // 4 + 5. Seal the epoch in the old file, then publish the new one.
    let mut ledger = log.lock_ledger()?;
    let sealed = seal_pending(file, ledger.pending(), current_len)
        .and_then(|()| temp.sync_all())
        .map_err(LogError::from)
        .and_then(|()| ledger.prepare_epoch());
    let next_epoch = match sealed {
        Ok(next) => next,
        Err(e) => {
            drop(temp);
            remove_output(log);
            return Err(e);
        }
    };

    if let Err(e) = publish(log) {
        ledger.abort_epoch(next_epoch);
        drop(temp);
        remove_output(log);
        return Err(e.into());
    }

    *file = temp;
    *index = new_index;
    ledger.commit_epoch(next_epoch);

    stats.bytes_after = new_len;
    Ok(current_len)
}

/// Copies the live records of `reader` into `output`.
///
/// `base` is the log offset of the reader's first byte. A record is live if
/// its flag is set, it is not a pending delete, and `offsets` points its key
/// at it.
fn copy_live<R: BufRead>(
    mut reader: R,
    base: u64,
    offsets: &HashMap<u64, u64>,
    pending: &HashSet<(u64, u64)>,
    output: &mut Output,
    stats: &mut CompactionStats,
) -> io::Result<()> {
    let mut offset = base;
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            return Ok(());
        }
        let start = offset;
        offset += n as u64;

        let Some(body) = line.strip_suffix(b"\n") else {
            warn!(offset = start, "incomplete record at end of compaction range");
            stats.records_dropped += 1;
            return Ok(());
        };
        stats.records_scanned += 1;

        let record = match record::parse_line(body) {
            Ok(record) => record,
            Err(reason) => {
                warn!(offset = start, reason, "dropping malformed record");
                stats.records_dropped += 1;
                continue;
            }
        };

        let hash = hash_key(record.key);
        let live = record.live
            && !pending.contains(&(hash, start))
            && offsets.get(&hash) == Some(&start);
        if live {
            output.push(start, hash, &line)?;
            stats.records_kept += 1;
        } else {
            stats.records_dropped += 1;
        }
    }
}

/// Marks copies whose source record stopped being live as deleted.
fn flip_stale(
    temp: &mut File,
    relocations: &HashMap<u64, Relocation>,
    live: &HashMap<u64, u64>,
) -> Result<(), LogError> {
    let mut flipped = 0usize;
    for (&old, r) in relocations {
        if live.get(&r.hash) != Some(&old) {
            temp.seek(SeekFrom::Start(r.new_offset))?;
            temp.write_all(&[DELETED])?;
            flipped += 1;
        }
    }
    if flipped > 0 {
        debug!(flipped, "copies invalidated during compaction");
    }
    Ok(())
}

/// Rewrites the flag byte of every pending delete in the old log.
fn seal_pending(file: &mut File, pending: &HashSet<(u64, u64)>, len: u64) -> io::Result<()> {
    if pending.is_empty() {
        return Ok(());
    }
    for &(_, offset) in pending {
        if offset < len {
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&[DELETED])?;
        }
    }
    file.sync_data()
}

/// Renames the compaction output over the log.
fn publish(log: &PersistentLog) -> io::Result<()> {
    #[cfg(test)]
    if log.fail_next_publish.swap(false, Ordering::AcqRel) {
        return Err(io::Error::other("rename refused"));
    }
    fs::rename(&log.compact_path, &log.path)
}

fn discard(log: &PersistentLog, output: Output) {
    drop(output);
    remove_output(log);
}

fn remove_output(log: &PersistentLog) {
    if let Err(e) = fs::remove_file(&log.compact_path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %log.compact_path.display(), "failed to remove compaction output: {e}");
        }
    }
}
