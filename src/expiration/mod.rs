//! # Expiration Index
//!
//! Groups keys with a TTL into coarse **time buckets** so that expiry is one
//! batched removal per tick instead of a timer per key.
//!
//! ```text
//! bucket(t) = floor(unix_secs(t) / interval) + 1
//! ```
//!
//! A key expiring at `t` lands in the bucket *after* the window containing
//! `t`. A sweep at time `now` drains bucket `bucket(now) - 1`, which only
//! holds keys whose expiration is already in the past. Keys may therefore
//! outlive their TTL by up to one interval plus one tick; reads still report
//! them as expired in the meantime.
//!
//! The sweep drains every bucket up to and including the due one, so a tick
//! that fires late does not strand older buckets.


use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds since the UNIX epoch, clamped to zero for earlier times.
pub(crate) fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub(crate) struct ExpirationIndex {
    interval_secs: u64,
    buckets: BTreeMap<u64, HashSet<u64>>,
}

impl ExpirationIndex {
    /// `interval` is rounded down to whole seconds, minimum one.
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval_secs: interval.as_secs().max(1),
            buckets: BTreeMap::new(),
        }
    }

    pub(crate) fn bucket_for(&self, expiration: SystemTime) -> u64 {
        unix_secs(expiration) / self.interval_secs + 1
    }

    pub(crate) fn add(&mut self, key: u64, expiration: Option<SystemTime>) {
        let Some(expiration) = expiration else {
            return;
        };
        let bucket = self.bucket_for(expiration);
        self.buckets.entry(bucket).or_default().insert(key);
    }

    pub(crate) fn remove(&mut self, key: u64, expiration: Option<SystemTime>) {
        let Some(expiration) = expiration else {
            return;
        };
        let bucket = self.bucket_for(expiration);
        if let Some(keys) = self.buckets.get_mut(&bucket) {
            keys.remove(&key);
            if keys.is_empty() {
                self.buckets.remove(&bucket);
            }
        }
    }

    /// Moves `key` from the bucket of `old` to the bucket of `new`.
    pub(crate) fn update(&mut self, key: u64, old: Option<SystemTime>, new: Option<SystemTime>) {
        self.remove(key, old);
        self.add(key, new);
    }

    /// Drains every bucket that is due at `now` and returns its keys.
    pub(crate) fn sweep(&mut self, now: SystemTime) -> Vec<u64> {
        let due = self.bucket_for(now) - 1;
        let pending = self.buckets.split_off(&(due + 1));
        let drained = std::mem::replace(&mut self.buckets, pending);
        drained.into_values().flatten().collect()
    }

    /// Number of keys tracked across all buckets.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.buckets.values().map(HashSet::len).sum()
    }

    #[cfg(test)]
    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}
