#[cfg(test)]
mod tests {
    use crate::shard::StoreError;
    use crate::shard::tests::store_with_capacity;

    #[test]
    fn capacity_is_never_exceeded() {
        let (store, _rx) = store_with_capacity(8);
        for i in 0..100 {
            store.set(format!("key-{i}").as_bytes(), i.to_string(), None).unwrap();
            assert!(store.len() <= 8);
        }
        assert_eq!(store.len(), 8);
        assert_eq!(store.stats().evictions, 92);
    }

    #[test]
    fn equal_frequencies_evict_oldest_first() {
        let (store, _rx) = store_with_capacity(3);
        store.set(b"a", "1".into(), None).unwrap();
        store.set(b"b", "2".into(), None).unwrap();
        store.set(b"c", "3".into(), None).unwrap();

        store.set(b"d", "4".into(), None).unwrap();
        assert!(matches!(store.get(b"a"), Err(StoreError::NotFound)));

        store.set(b"e", "5".into(), None).unwrap();
        assert!(matches!(store.get(b"b"), Err(StoreError::NotFound)));

        assert_eq!(store.get(b"c").unwrap(), "3");
        assert_eq!(store.get(b"d").unwrap(), "4");
        assert_eq!(store.get(b"e").unwrap(), "5");
    }

    #[test]
    fn least_frequent_key_is_evicted() {
        let (store, _rx) = store_with_capacity(3);
        store.set(b"a", "1".into(), None).unwrap();
        store.set(b"b", "2".into(), None).unwrap();
        store.set(b"c", "3".into(), None).unwrap();

        store.get(b"a").unwrap();
        store.get(b"a").unwrap();
        store.get(b"b").unwrap();
        store.flush_access_buffer().unwrap();

        store.set(b"d", "4".into(), None).unwrap();
        assert!(matches!(store.get(b"c"), Err(StoreError::NotFound)));
        assert_eq!(store.get(b"a").unwrap(), "1");
        assert_eq!(store.get(b"b").unwrap(), "2");
        assert_eq!(store.get(b"d").unwrap(), "4");
    }

    #[test]
    fn new_key_is_never_its_own_victim() {
        let (store, _rx) = store_with_capacity(2);
        store.set(b"hot-1", "1".into(), None).unwrap();
        store.set(b"hot-2", "2".into(), None).unwrap();
        for _ in 0..5 {
            store.get(b"hot-1").unwrap();
            store.get(b"hot-2").unwrap();
        }
        store.flush_access_buffer().unwrap();

        store.set(b"cold", "3".into(), None).unwrap();
        assert_eq!(store.get(b"cold").unwrap(), "3");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn deleted_keys_are_not_eviction_candidates() {
        let (store, _rx) = store_with_capacity(2);
        store.set(b"a", "1".into(), None).unwrap();
        store.set(b"b", "2".into(), None).unwrap();
        store.delete(b"a").unwrap();

        // Room is available again, nothing is evicted.
        store.set(b"c", "3".into(), None).unwrap();
        assert_eq!(store.stats().evictions, 0);
        assert_eq!(store.get(b"b").unwrap(), "2");
        assert_eq!(store.get(b"c").unwrap(), "3");
    }

    #[test]
    fn reset_stats_restores_fifo_order() {
        let (store, _rx) = store_with_capacity(3);
        store.set(b"a", "1".into(), None).unwrap();
        store.set(b"b", "2".into(), None).unwrap();
        store.set(b"c", "3".into(), None).unwrap();
        for _ in 0..10 {
            store.get(b"a").unwrap();
        }
        store.flush_access_buffer().unwrap();

        store.reset_stats().unwrap();

        // "a" lost its read history and is the oldest entry.
        store.set(b"d", "4".into(), None).unwrap();
        assert!(matches!(store.get(b"a"), Err(StoreError::NotFound)));
        assert_eq!(store.get(b"b").unwrap(), "2");
    }
}
