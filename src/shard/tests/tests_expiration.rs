#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use crate::shard::StoreError;
    use crate::shard::tests::store_with_capacity;

    const LATER: Duration = Duration::from_secs(60);

    #[test]
    fn elapsed_ttl_reads_as_expired() {
        let (store, _rx) = store_with_capacity(16);
        store.set(b"k", "v".into(), Some(Duration::ZERO)).unwrap();

        assert!(matches!(store.get(b"k"), Err(StoreError::Expired)));
        assert_eq!(store.stats().expired, 1);
        // Still resident until swept.
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn live_ttl_reads_normally() {
        let (store, _rx) = store_with_capacity(16);
        store.set(b"k", "v".into(), Some(Duration::from_secs(3600))).unwrap();
        assert_eq!(store.get(b"k").unwrap(), "v");
    }

    #[test]
    fn sweep_removes_expired_keys() {
        let (store, _rx) = store_with_capacity(16);
        store.set(b"gone", "v".into(), Some(Duration::ZERO)).unwrap();
        store.set(b"kept", "v".into(), None).unwrap();

        let removed = store.sweep_expired(SystemTime::now() + LATER).unwrap();
        assert_eq!(removed, 1);
        assert!(matches!(store.get(b"gone"), Err(StoreError::NotFound)));
        assert_eq!(store.get(b"kept").unwrap(), "v");
        assert_eq!(store.len(), 1);
        assert_eq!(store.queued(), 1);
        assert_eq!(store.stats().expirations, 1);
    }

    #[test]
    fn sweep_before_due_removes_nothing() {
        let (store, _rx) = store_with_capacity(16);
        store.set(b"k", "v".into(), Some(Duration::from_secs(3600))).unwrap();

        assert_eq!(store.sweep_expired(SystemTime::now()).unwrap(), 0);
        assert_eq!(store.get(b"k").unwrap(), "v");
    }

    #[test]
    fn extended_ttl_survives_old_bucket_sweep() {
        let (store, _rx) = store_with_capacity(16);
        store.set(b"k", "v1".into(), Some(Duration::ZERO)).unwrap();
        store.set(b"k", "v2".into(), Some(Duration::from_secs(3600))).unwrap();

        assert_eq!(store.sweep_expired(SystemTime::now() + LATER).unwrap(), 0);
        assert_eq!(store.get(b"k").unwrap(), "v2");
    }

    #[test]
    fn reinserted_key_survives_stale_bucket_entry() {
        let (store, _rx) = store_with_capacity(16);
        store.set(b"k", "v1".into(), Some(Duration::ZERO)).unwrap();
        store.delete(b"k").unwrap();
        store.set(b"k", "v2".into(), None).unwrap();

        // The stale bucket still names "k"; the sweep re-checks the item.
        assert_eq!(store.sweep_expired(SystemTime::now() + LATER).unwrap(), 0);
        assert_eq!(store.get(b"k").unwrap(), "v2");
    }

    #[test]
    fn evicted_key_leaves_expiration_index() {
        let (store, _rx) = store_with_capacity(1);
        store.set(b"a", "1".into(), Some(Duration::ZERO)).unwrap();
        store.set(b"b", "2".into(), None).unwrap();

        assert_eq!(store.stats().evictions, 1);
        assert_eq!(store.sweep_expired(SystemTime::now() + LATER).unwrap(), 0);
        assert_eq!(store.get(b"b").unwrap(), "2");
    }
}
