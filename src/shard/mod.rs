//! # Sharded Store
//!
//! The in-memory tier: a map split into [`SHARD_COUNT`] partitions, each
//! behind its own `RwLock`, with one process-wide capacity bound.
//!
//! ## Layout
//!
//! ```text
//!  key ──xxh64──> hash ──(hash % 256)──> shard[i]: RwLock<HashMap<hash, Item>>
//!
//!  policy:      Mutex<EvictionPolicy>    (sketch + min-heap, global)
//!  expiration:  Mutex<ExpirationIndex>   (time buckets, global)
//!  access log:  Mutex<Vec<hash>>         (batched reads, flushed to a channel)
//! ```
//!
//! ## Locking
//!
//! Writers hold the shard lock while they update the expiration index and the
//! eviction policy, so bookkeeping for one key is ordered the same way as the
//! map itself. The reverse never happens: the policy and expiration locks are
//! always released before a shard lock is taken.
//!
//! ## Capacity
//!
//! A new key first reserves a slot by bumping the atomic length. If the store
//! was already full, the lowest-ranked resident key is evicted **before** the
//! insert, so the incoming key can never be chosen as its own victim. With
//! `reject_when_full` the reservation fails with
//! [`StoreError::CapacityExceeded`] instead.
//!
//! Racing inserts can all reserve before any of them is queued, leaving
//! nothing to evict. Each insert therefore trims the store back to capacity
//! once its own key is queued, sparing that key.
//!
//! ## Reads
//!
//! `get` only takes the shard read lock. The hash of every hit is appended to
//! a small buffer; a full buffer is handed off with a non-blocking `try_send`
//! to the frequency aggregator, which calls [`ShardedStore::apply_accesses`].

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};

use crossbeam::channel::{Sender, TrySendError};
use thiserror::Error;
use tracing::{debug, error, trace};

use crate::cache::CacheConfig;
use crate::eviction::EvictionPolicy;
use crate::expiration::ExpirationIndex;
use crate::hash::hash_key;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Number of independently locked partitions.
pub(crate) const SHARD_COUNT: usize = 256;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    /// Key absent or never written.
    #[error("Key not found")]
    NotFound,

    /// Key present but its TTL has elapsed.
    #[error("Key expired")]
    Expired,

    /// The store is full and configured to reject new keys.
    #[error("Capacity exceeded")]
    CapacityExceeded,

    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Items & statistics
// ------------------------------------------------------------------------------------------------

#[derive(Debug)]
struct Item<V> {
    value: V,
    expiration: Option<SystemTime>,
}

impl<V> Item<V> {
    fn is_expired(&self, now: SystemTime) -> bool {
        self.expiration.is_some_and(|exp| now >= exp)
    }
}

/// Point-in-time counters of the in-memory tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads that returned a value.
    pub hits: u64,
    /// Reads of absent keys.
    pub misses: u64,
    /// Reads of keys whose TTL had elapsed.
    pub expired: u64,
    /// Keys removed to make room for new ones.
    pub evictions: u64,
    /// Keys removed by the expiration sweep.
    pub expirations: u64,
    /// Resident keys.
    pub len: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

// ------------------------------------------------------------------------------------------------
// ShardedStore
// ------------------------------------------------------------------------------------------------

type Shard<V> = RwLock<HashMap<u64, Item<V>>>;

pub(crate) struct ShardedStore<V> {
    shards: Box<[Shard<V>]>,
    len: AtomicUsize,
    capacity: usize,
    reject_when_full: bool,
    policy: Mutex<EvictionPolicy>,
    expiration: Mutex<ExpirationIndex>,
    access_buffer: Mutex<Vec<u64>>,
    batch_size: usize,
    batch_tx: Sender<Vec<u64>>,
    counters: Counters,
}

impl<V: Clone> ShardedStore<V> {
    /// Builds an empty store. Full access batches are sent on `batch_tx`.
    pub(crate) fn new(config: &CacheConfig, batch_tx: Sender<Vec<u64>>) -> Self {
        let shards = (0..SHARD_COUNT)
            .map(|_| RwLock::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            shards,
            len: AtomicUsize::new(0),
            capacity: config.capacity,
            reject_when_full: config.reject_when_full,
            policy: Mutex::new(EvictionPolicy::new(config.sketch_width)),
            expiration: Mutex::new(ExpirationIndex::new(config.sweep_interval)),
            access_buffer: Mutex::new(Vec::with_capacity(config.frequency_batch_size)),
            batch_size: config.frequency_batch_size.max(1),
            batch_tx,
            counters: Counters::default(),
        }
    }

    // --------------------------------------------------------------------------------------------
    // Foreground operations
    // --------------------------------------------------------------------------------------------

    /// Inserts or replaces `key`. `ttl` of `None` never expires.
    pub(crate) fn set(&self, key: &[u8], value: V, ttl: Option<Duration>) -> Result<(), StoreError> {
        let hash = hash_key(key);
        let expiration = ttl.and_then(|ttl| SystemTime::now().checked_add(ttl));

        {
            let mut shard = self.write_shard(hash)?;
            if let Some(item) = shard.get_mut(&hash) {
                let old = std::mem::replace(&mut item.expiration, expiration);
                item.value = value;
                self.lock_expiration()?.update(hash, old, expiration);
                self.lock_policy()?.record_write(hash);
                trace!(key = hash, "replaced");
                return Ok(());
            }
        }

        // Eviction may need any shard lock, so none is held here.
        self.reserve_slot()?;

        let mut shard = self.write_shard(hash)?;
        if let Some(item) = shard.get_mut(&hash) {
            // Lost a race with another insert of the same key.
            self.len.fetch_sub(1, Ordering::AcqRel);
            let old = std::mem::replace(&mut item.expiration, expiration);
            item.value = value;
            self.lock_expiration()?.update(hash, old, expiration);
        } else {
            shard.insert(hash, Item { value, expiration });
            self.lock_expiration()?.add(hash, expiration);
        }
        self.lock_policy()?.record_write(hash);
        drop(shard);
        trace!(key = hash, "inserted");

        if !self.reject_when_full {
            self.trim_to_capacity(hash)?;
        }
        Ok(())
    }

    /// Returns a copy of the value stored under `key`.
    pub(crate) fn get(&self, key: &[u8]) -> Result<V, StoreError> {
        let hash = hash_key(key);
        let now = SystemTime::now();

        let value = {
            let shard = self.read_shard(hash)?;
            match shard.get(&hash) {
                None => {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    return Err(StoreError::NotFound);
                }
                Some(item) if item.is_expired(now) => {
                    self.counters.expired.fetch_add(1, Ordering::Relaxed);
                    return Err(StoreError::Expired);
                }
                Some(item) => item.value.clone(),
            }
        };

        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        self.record_access(hash)?;
        Ok(value)
    }

    /// Removes `key`. Returns `false` if it was not present.
    pub(crate) fn delete(&self, key: &[u8]) -> Result<bool, StoreError> {
        let hash = hash_key(key);
        let mut shard = self.write_shard(hash)?;
        if shard.remove(&hash).is_none() {
            return Ok(false);
        }
        self.len.fetch_sub(1, Ordering::AcqRel);
        self.lock_policy()?.forget(hash);
        trace!(key = hash, "deleted");
        Ok(true)
    }

    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub(crate) fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            len: self.len(),
        }
    }

    /// Zeroes the counters and forgets all frequency history. Eviction
    /// order falls back to insertion order until keys are read again.
    pub(crate) fn reset_stats(&self) -> Result<(), StoreError> {
        self.counters.hits.store(0, Ordering::Relaxed);
        self.counters.misses.store(0, Ordering::Relaxed);
        self.counters.expired.store(0, Ordering::Relaxed);
        self.counters.evictions.store(0, Ordering::Relaxed);
        self.counters.expirations.store(0, Ordering::Relaxed);
        self.lock_policy()?.reset();
        debug!("statistics reset");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Background hooks
    // --------------------------------------------------------------------------------------------

    /// Removes every key whose expiration bucket is due at `now`.
    ///
    /// Each drained key is checked against its own current expiration, so
    /// keys that were deleted, re-set, or given a later TTL survive.
    pub(crate) fn sweep_expired(&self, now: SystemTime) -> Result<usize, StoreError> {
        let due = self.lock_expiration()?.sweep(now);
        if due.is_empty() {
            return Ok(0);
        }

        let mut removed = 0;
        for hash in due {
            let mut shard = self.write_shard(hash)?;
            let expired = shard.get(&hash).is_some_and(|item| item.is_expired(now));
            if expired {
                shard.remove(&hash);
                self.len.fetch_sub(1, Ordering::AcqRel);
                self.lock_policy()?.forget(hash);
                removed += 1;
            }
        }

        self.counters
            .expirations
            .fetch_add(removed as u64, Ordering::Relaxed);
        if removed > 0 {
            debug!(removed, "expired keys swept");
        }
        Ok(removed)
    }

    /// Feeds a batch of read hashes into the frequency sketch and re-ranks
    /// the keys that are still queued.
    pub(crate) fn apply_accesses(&self, batch: &[u64]) -> Result<(), StoreError> {
        let mut policy = self.lock_policy()?;
        for &hash in batch {
            policy.record_access(hash);
        }
        trace!(accesses = batch.len(), "access batch applied");
        Ok(())
    }

    /// Applies whatever is sitting in the access buffer, bypassing the channel.
    pub(crate) fn flush_access_buffer(&self) -> Result<(), StoreError> {
        let batch = std::mem::take(&mut *self.lock_buffer()?);
        if batch.is_empty() {
            return Ok(());
        }
        self.apply_accesses(&batch)
    }

    // --------------------------------------------------------------------------------------------
    // Internal helpers
    // --------------------------------------------------------------------------------------------

    fn shard(&self, hash: u64) -> &Shard<V> {
        &self.shards[(hash % SHARD_COUNT as u64) as usize]
    }

    fn read_shard(&self, hash: u64) -> Result<RwLockReadGuard<'_, HashMap<u64, Item<V>>>, StoreError> {
        self.shard(hash)
            .read()
            .map_err(|_| StoreError::Internal("RwLock poisoned".into()))
    }

    fn write_shard(
        &self,
        hash: u64,
    ) -> Result<RwLockWriteGuard<'_, HashMap<u64, Item<V>>>, StoreError> {
        self.shard(hash)
            .write()
            .map_err(|_| StoreError::Internal("RwLock poisoned".into()))
    }

    fn lock_policy(&self) -> Result<MutexGuard<'_, EvictionPolicy>, StoreError> {
        self.policy.lock().map_err(|_| {
            error!("Mutex poisoned");
            StoreError::Internal("Mutex poisoned".into())
        })
    }

    fn lock_expiration(&self) -> Result<MutexGuard<'_, ExpirationIndex>, StoreError> {
        self.expiration.lock().map_err(|_| {
            error!("Mutex poisoned");
            StoreError::Internal("Mutex poisoned".into())
        })
    }

    fn lock_buffer(&self) -> Result<MutexGuard<'_, Vec<u64>>, StoreError> {
        self.access_buffer
            .lock()
            .map_err(|_| StoreError::Internal("Mutex poisoned".into()))
    }

    /// Claims room for one new key, evicting first if the store is full.
    fn reserve_slot(&self) -> Result<(), StoreError> {
        if self.reject_when_full {
            return self
                .len
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |len| {
                    (len < self.capacity).then_some(len + 1)
                })
                .map(|_| ())
                .map_err(|_| StoreError::CapacityExceeded);
        }

        let before = self.len.fetch_add(1, Ordering::AcqRel);
        if before >= self.capacity {
            // May find nothing while racing inserts are still unpublished;
            // the trim after the insert settles that.
            self.evict_one(None)?;
        }
        Ok(())
    }

    /// Evicts until the store is back within capacity, never choosing
    /// `spare`. Stops early when the queue holds no other candidate; the
    /// insert that published that candidate trims again afterwards.
    fn trim_to_capacity(&self, spare: u64) -> Result<(), StoreError> {
        while self.len.load(Ordering::Acquire) > self.capacity {
            if !self.evict_one(Some(spare))? {
                break;
            }
        }
        Ok(())
    }

    /// Pops queue entries until one names a resident key, then removes it.
    /// Returns `false` if the queue ran dry first.
    fn evict_one(&self, spare: Option<u64>) -> Result<bool, StoreError> {
        loop {
            let Some(victim) = self.lock_policy()?.pop_victim(spare) else {
                return Ok(false);
            };

            let mut shard = self.write_shard(victim)?;
            let Some(item) = shard.remove(&victim) else {
                continue;
            };
            self.len.fetch_sub(1, Ordering::AcqRel);
            self.lock_expiration()?.remove(victim, item.expiration);
            // A concurrent overwrite may have queued the victim again.
            self.lock_policy()?.forget(victim);
            drop(shard);

            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = victim, "evicted");
            return Ok(true);
        }
    }

    /// Buffers a read and ships the buffer once it reaches the batch size.
    fn record_access(&self, hash: u64) -> Result<(), StoreError> {
        let batch = {
            let mut buffer = self.lock_buffer()?;
            buffer.push(hash);
            if buffer.len() < self.batch_size {
                return Ok(());
            }
            std::mem::replace(&mut *buffer, Vec::with_capacity(self.batch_size))
        };

        match self.batch_tx.try_send(batch) {
            Ok(()) => {}
            Err(TrySendError::Full(batch)) => {
                trace!(dropped = batch.len(), "aggregator busy, access batch dropped");
            }
            Err(TrySendError::Disconnected(batch)) => {
                trace!(dropped = batch.len(), "aggregator gone, access batch dropped");
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.policy.lock().map(|p| p.queued()).unwrap_or(0)
    }
}
