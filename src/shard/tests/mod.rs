mod tests_basic;
mod tests_concurrency;
mod tests_eviction;
mod tests_expiration;

use crossbeam::channel::{Receiver, bounded};

use crate::cache::CacheConfig;
use crate::shard::ShardedStore;

/// Store with the given capacity and an aggregator channel the test owns.
pub(crate) fn store_with_capacity(capacity: usize) -> (ShardedStore<String>, Receiver<Vec<u64>>) {
    let config = CacheConfig {
        capacity,
        ..CacheConfig::default()
    };
    let (tx, rx) = bounded(16);
    (ShardedStore::new(&config, tx), rx)
}
