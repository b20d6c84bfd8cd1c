//! # Deletion Ledger
//!
//! A plain-text journal of the deletes applied to the record log since the
//! last compaction. One file per **epoch**, named by a monotonically
//! increasing sequence number:
//!
//! ```text
//! <data_dir>/deleted/deleted-000007.log
//!
//! <record_offset> <key>\n
//! <record_offset> <key>\n
//! ```
//!
//! The offset pins the exact record a delete targeted, so replaying the
//! ledger can never remove a later re-insert of the same key.
//!
//! ## Epochs
//!
//! - A delete is journaled **before** its flag byte is flipped in the log.
//!   If the flip never reaches disk, the next open re-applies it.
//! - Only the highest-numbered file is authoritative. Lower-numbered files
//!   left behind by a crash are removed on open.
//! - Rotation is split into [`DeletionLedger::prepare_epoch`] (create the next
//!   file) and [`DeletionLedger::commit_epoch`] (switch to it, forget pending
//!   entries, remove older files), so the compactor can roll back if the log
//!   rename fails.

#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, trace, warn};

use crate::hash::hash_key;
use crate::log::LogError;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

pub(crate) const LEDGER_DIR_NAME: &str = "deleted";
const LEDGER_PREFIX: &str = "deleted-";
const LEDGER_SUFFIX: &str = ".log";

// ------------------------------------------------------------------------------------------------
// Entries
// ------------------------------------------------------------------------------------------------

/// One journaled delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LedgerEntry {
    pub(crate) offset: u64,
    pub(crate) key: Vec<u8>,
}

impl LedgerEntry {
    fn encode(offset: u64, key: &[u8]) -> Vec<u8> {
        let mut line = offset.to_string().into_bytes();
        line.push(b' ');
        line.extend_from_slice(key);
        line.push(b'\n');
        line
    }

    fn parse(line: &[u8]) -> Option<Self> {
        let space = line.iter().position(|&b| b == b' ')?;
        let offset = std::str::from_utf8(&line[..space]).ok()?.parse().ok()?;
        let key = &line[space + 1..];
        if key.is_empty() {
            return None;
        }
        Some(Self {
            offset,
            key: key.to_vec(),
        })
    }
}

/// The file of the next epoch, created but not yet in use.
#[derive(Debug)]
pub(crate) struct NextEpoch {
    seq: u64,
    path: PathBuf,
    file: File,
}

// ------------------------------------------------------------------------------------------------
// DeletionLedger
// ------------------------------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct DeletionLedger {
    dir: PathBuf,
    seq: u64,
    file: File,
    pending: HashSet<(u64, u64)>,
    sync_writes: bool,
}

impl DeletionLedger {
    /// Opens the ledger under `<data_dir>/deleted`, creating it if needed.
    ///
    /// Returns the ledger positioned on its newest file together with the
    /// entries that file already holds. Those entries are **not** counted as
    /// pending; the caller re-applies what still matters and then starts a
    /// fresh epoch.
    pub(crate) fn open(
        data_dir: &Path,
        sync_writes: bool,
    ) -> Result<(Self, Vec<LedgerEntry>), LogError> {
        let dir = data_dir.join(LEDGER_DIR_NAME);
        fs::create_dir_all(&dir)?;

        let mut seqs = list_seqs(&dir)?;
        seqs.sort_unstable();

        let (seq, entries) = match seqs.pop() {
            Some(seq) => {
                for stale in seqs {
                    let path = ledger_path(&dir, stale);
                    warn!(path = %path.display(), "removing ledger left over from an older epoch");
                    fs::remove_file(&path)?;
                }
                (seq, read_entries(&ledger_path(&dir, seq))?)
            }
            None => (1, Vec::new()),
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(ledger_path(&dir, seq))?;

        info!(seq, recovered = entries.len(), "deletion ledger opened");

        Ok((
            Self {
                dir,
                seq,
                file,
                pending: HashSet::new(),
                sync_writes,
            },
            entries,
        ))
    }

    /// Journals a delete of the record of `key` at `offset`.
    pub(crate) fn record(&mut self, offset: u64, key: &[u8]) -> Result<(), LogError> {
        self.file.write_all(&LedgerEntry::encode(offset, key))?;
        if self.sync_writes {
            self.file.sync_data()?;
        }
        self.pending.insert((hash_key(key), offset));
        trace!(seq = self.seq, offset, "delete journaled");
        Ok(())
    }

    /// `(key_hash, offset)` of every delete journaled in this epoch.
    pub(crate) fn pending(&self) -> &HashSet<(u64, u64)> {
        &self.pending
    }

    #[cfg(test)]
    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    /// Creates the file for the next epoch without switching to it.
    pub(crate) fn prepare_epoch(&self) -> Result<NextEpoch, LogError> {
        let seq = self.seq + 1;
        let path = ledger_path(&self.dir, seq);
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&path)?;
        file.sync_all()?;
        Ok(NextEpoch { seq, path, file })
    }

    /// Switches to `next`, forgetting this epoch's pending deletes and
    /// removing every older ledger file.
    pub(crate) fn commit_epoch(&mut self, next: NextEpoch) {
        let previous = self.seq;
        self.file = next.file;
        self.seq = next.seq;
        self.pending.clear();

        match list_seqs(&self.dir) {
            Ok(seqs) => {
                for seq in seqs.into_iter().filter(|&seq| seq < self.seq) {
                    let path = ledger_path(&self.dir, seq);
                    if let Err(e) = fs::remove_file(&path) {
                        warn!(path = %path.display(), "failed to remove old ledger: {e}");
                    }
                }
            }
            Err(e) => warn!("failed to list ledger directory: {e}"),
        }

        info!(from = previous, to = self.seq, "deletion epoch advanced");
    }

    /// Discards a prepared epoch after a failed compaction.
    pub(crate) fn abort_epoch(&self, next: NextEpoch) {
        let NextEpoch { path, file, .. } = next;
        drop(file);
        if let Err(e) = fs::remove_file(&path) {
            warn!(path = %path.display(), "failed to remove aborted ledger: {e}");
        } else {
            debug!(path = %path.display(), "aborted ledger removed");
        }
    }

    /// Starts a new, empty epoch immediately.
    pub(crate) fn rotate(&mut self) -> Result<(), LogError> {
        let next = self.prepare_epoch()?;
        self.commit_epoch(next);
        Ok(())
    }

    pub(crate) fn sync(&self) -> Result<(), LogError> {
        self.file.sync_all()?;
        Ok(())
    }
}

impl Drop for DeletionLedger {
    fn drop(&mut self) {
        if let Err(e) = self.file.sync_all() {
            error!("Failed to sync deletion ledger on drop: {}", e);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// File helpers
// ------------------------------------------------------------------------------------------------

fn ledger_path(dir: &Path, seq: u64) -> PathBuf {
    dir.join(format!("{LEDGER_PREFIX}{seq:06}{LEDGER_SUFFIX}"))
}

/// Parses `seq` from a file name of the form `deleted-<seq>.log`.
fn parse_seq_from_path(path: &Path) -> Option<u64> {
    let name = path.file_name().and_then(OsStr::to_str)?;
    name.strip_prefix(LEDGER_PREFIX)?
        .strip_suffix(LEDGER_SUFFIX)?
        .parse::<u64>()
        .ok()
}

fn list_seqs(dir: &Path) -> io::Result<Vec<u64>> {
    let mut seqs = Vec::new();
    for entry in fs::read_dir(dir)? {
        if let Some(seq) = parse_seq_from_path(&entry?.path()) {
            seqs.push(seq);
        }
    }
    Ok(seqs)
}

/// Reads every complete, well-formed line of a ledger file.
fn read_entries(path: &Path) -> Result<Vec<LedgerEntry>, LogError> {
    let data = fs::read(path)?;
    let mut entries = Vec::new();

    for line in data.split_inclusive(|&b| b == b'\n') {
        let Some(line) = line.strip_suffix(b"\n") else {
            warn!(path = %path.display(), "ignoring torn ledger tail");
            break;
        };
        match LedgerEntry::parse(line) {
            Some(entry) => entries.push(entry),
            None => warn!(path = %path.display(), "skipping malformed ledger line"),
        }
    }
    Ok(entries)
}
