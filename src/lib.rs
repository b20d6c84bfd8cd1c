//! # ringcache
//!
//! An embeddable two-tier key-value cache.
//!
//! - [`Cache`] keeps typed values in memory across 256 lock-striped shards,
//!   with optional per-key TTLs and a fixed capacity. When full, the key read
//!   least often (per a count-min sketch) is evicted, oldest first among
//!   equals.
//! - [`DiskCache`] keeps byte values in an append-only log file. Deletes flip
//!   a flag byte in place and are journaled for crash safety, recent reads
//!   are served from a CLOCK ring, and a scheduled compactor rewrites the log
//!   without its dead records.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use ringcache::{Cache, CacheConfig, DiskCache, LogConfig, Tier};
//!
//! let cache: Cache<String> = Cache::new(CacheConfig::default()).unwrap();
//! cache.set(b"session", "alice".to_string(), Some(Duration::from_secs(60))).unwrap();
//! assert_eq!(cache.get(b"session").unwrap(), "alice");
//! cache.close().unwrap();
//!
//! let disk = DiskCache::open("/tmp/ringcache", LogConfig::default()).unwrap();
//! disk.set(b"user:1", b"alice").unwrap();
//! assert_eq!(disk.get(b"user:1").unwrap(), b"alice");
//! disk.delete(b"user:1").unwrap();
//! assert_eq!(disk.size(Tier::Disk).unwrap(), 0);
//! disk.close().unwrap();
//! ```
//!
//! ## On-disk layout
//!
//! ```text
//! <dir>/ringcache.log             one "<flag>#<key> <value>\n" line per write
//! <dir>/ringcache.log.compact     compaction output, renamed over the log
//! <dir>/deleted/deleted-NNNNNN.log  "<offset> <key>\n" per journaled delete
//! ```

pub(crate) mod cache;
pub(crate) mod compaction;
pub(crate) mod disk;
pub(crate) mod eviction;
pub(crate) mod expiration;
pub(crate) mod hash;
pub(crate) mod ledger;
pub(crate) mod log;
pub(crate) mod ring;
pub(crate) mod shard;
pub(crate) mod sketch;
pub(crate) mod worker;

use std::io;

use thiserror::Error;

pub use cache::{Cache, CacheConfig};
pub use compaction::{CompactionSchedule, CompactionState, CompactionStats};
pub use disk::{DiskCache, LogConfig};
pub use log::Tier;
pub use shard::CacheStats;

use log::LogError;
use shard::StoreError;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by [`Cache`] and [`DiskCache`] operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Key absent, deleted, or evicted.
    #[error("key not found")]
    NotFound,

    /// Key present but its TTL has elapsed.
    #[error("key expired")]
    Expired,

    /// The cache is full and configured to reject new keys.
    #[error("capacity exceeded")]
    CapacityExceeded,

    /// The handle has been closed.
    #[error("cache is closed")]
    Closed,

    /// Invalid configuration parameter.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Key or value constraint violated.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// On-disk data does not match the in-memory index.
    #[error("corrupted log: {0}")]
    Corruption(String),

    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for CacheError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => Self::NotFound,
            StoreError::Expired => Self::Expired,
            StoreError::CapacityExceeded => Self::CapacityExceeded,
            StoreError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<LogError> for CacheError {
    fn from(e: LogError) -> Self {
        match e {
            LogError::Io(e) => Self::Io(e),
            LogError::NotFound => Self::NotFound,
            LogError::InvalidArgument(msg) => Self::InvalidArgument(msg),
            LogError::Corruption(msg) => Self::Corruption(msg),
            LogError::Internal(msg) => Self::Internal(msg),
        }
    }
}
