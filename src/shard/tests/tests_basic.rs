#[cfg(test)]
mod tests {
    use crate::cache::CacheConfig;
    use crate::shard::tests::store_with_capacity;
    use crate::shard::{ShardedStore, StoreError};
    use crossbeam::channel::bounded;

    #[test]
    fn set_then_get_round_trips() {
        let (store, _rx) = store_with_capacity(16);
        store.set(b"alpha", "one".into(), None).unwrap();
        store.set(b"beta", "two".into(), None).unwrap();

        assert_eq!(store.get(b"alpha").unwrap(), "one");
        assert_eq!(store.get(b"beta").unwrap(), "two");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn get_missing_is_not_found() {
        let (store, _rx) = store_with_capacity(16);
        assert!(matches!(store.get(b"nope"), Err(StoreError::NotFound)));
        assert_eq!(store.stats().misses, 1);
    }

    #[test]
    fn overwrite_replaces_value_without_growing() {
        let (store, _rx) = store_with_capacity(16);
        store.set(b"k", "v1".into(), None).unwrap();
        store.set(b"k", "v2".into(), None).unwrap();

        assert_eq!(store.get(b"k").unwrap(), "v2");
        assert_eq!(store.len(), 1);
        assert_eq!(store.queued(), 1);
    }

    #[test]
    fn delete_removes_key() {
        let (store, _rx) = store_with_capacity(16);
        store.set(b"k", "v".into(), None).unwrap();

        assert!(store.delete(b"k").unwrap());
        assert!(matches!(store.get(b"k"), Err(StoreError::NotFound)));
        assert_eq!(store.len(), 0);
        assert_eq!(store.queued(), 0);
    }

    #[test]
    fn delete_missing_is_noop() {
        let (store, _rx) = store_with_capacity(16);
        store.set(b"k", "v".into(), None).unwrap();

        assert!(!store.delete(b"other").unwrap());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn stats_count_hits_and_misses() {
        let (store, _rx) = store_with_capacity(16);
        store.set(b"k", "v".into(), None).unwrap();
        store.get(b"k").unwrap();
        store.get(b"k").unwrap();
        let _ = store.get(b"missing");

        let stats = store.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.len, 1);

        store.reset_stats().unwrap();
        let stats = store.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.len, 1);
    }

    #[test]
    fn full_access_buffer_is_sent_to_aggregator() {
        let config = CacheConfig {
            frequency_batch_size: 4,
            ..CacheConfig::default()
        };
        let (tx, rx) = bounded(4);
        let store: ShardedStore<String> = ShardedStore::new(&config, tx);
        store.set(b"k", "v".into(), None).unwrap();

        for _ in 0..3 {
            store.get(b"k").unwrap();
        }
        assert!(rx.try_recv().is_err());

        store.get(b"k").unwrap();
        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.len(), 4);
        assert!(batch.iter().all(|h| *h == batch[0]));
    }

    #[test]
    fn full_channel_drops_batch_without_blocking() {
        let config = CacheConfig {
            frequency_batch_size: 1,
            ..CacheConfig::default()
        };
        let (tx, rx) = bounded(1);
        let store: ShardedStore<String> = ShardedStore::new(&config, tx);
        store.set(b"k", "v".into(), None).unwrap();

        // Nobody drains the channel; later batches are discarded.
        for _ in 0..10 {
            store.get(b"k").unwrap();
        }
        assert_eq!(rx.len(), 1);
        assert_eq!(store.stats().hits, 10);
    }

    #[test]
    fn reject_mode_refuses_new_keys_when_full() {
        let config = CacheConfig {
            capacity: 2,
            reject_when_full: true,
            ..CacheConfig::default()
        };
        let (tx, _rx) = bounded(4);
        let store: ShardedStore<String> = ShardedStore::new(&config, tx);

        store.set(b"a", "1".into(), None).unwrap();
        store.set(b"b", "2".into(), None).unwrap();
        assert!(matches!(
            store.set(b"c", "3".into(), None),
            Err(StoreError::CapacityExceeded)
        ));

        // Overwrites still succeed and nothing was evicted.
        store.set(b"a", "11".into(), None).unwrap();
        assert_eq!(store.get(b"a").unwrap(), "11");
        assert_eq!(store.get(b"b").unwrap(), "2");
        assert_eq!(store.len(), 2);
        assert_eq!(store.stats().evictions, 0);

        // Room frees up after a delete.
        store.delete(b"b").unwrap();
        store.set(b"c", "3".into(), None).unwrap();
        assert_eq!(store.get(b"c").unwrap(), "3");
    }
}
