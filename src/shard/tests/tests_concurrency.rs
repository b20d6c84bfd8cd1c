#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use crate::shard::tests::store_with_capacity;

    #[test]
    fn concurrent_writers_respect_capacity() {
        let (store, rx) = store_with_capacity(500);
        let store = Arc::new(store);

        // Keep the aggregator channel drained like the real consumer.
        let drain = thread::spawn(move || while rx.recv().is_ok() {});

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..400 {
                        let key = format!("t{t}-k{i}");
                        store.set(key.as_bytes(), key.clone(), None).unwrap();
                        let _ = store.get(key.as_bytes());
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert!(store.len() <= 500);
        assert!(store.stats().evictions >= 3200 - 500);

        drop(store);
        drain.join().unwrap();
    }

    #[test]
    fn concurrent_readers_and_deleters_on_same_keys() {
        let (store, _rx) = store_with_capacity(1_000);
        let store = Arc::new(store);
        for i in 0..200 {
            store.set(format!("k{i}").as_bytes(), i.to_string(), None).unwrap();
        }

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..200 {
                        let _ = store.get(format!("k{i}").as_bytes());
                    }
                })
            })
            .collect();
        let deleter = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in (0..200).step_by(2) {
                    store.delete(format!("k{i}").as_bytes()).unwrap();
                }
            })
        };

        for h in readers {
            h.join().unwrap();
        }
        deleter.join().unwrap();

        assert_eq!(store.len(), 100);
        assert_eq!(store.queued(), 100);
        assert_eq!(store.get(b"k1").unwrap(), "1");
        assert!(store.get(b"k0").is_err());
    }

    #[test]
    fn racing_inserts_into_tiny_store_settle_at_capacity() {
        for round in 0..200 {
            let (store, _rx) = store_with_capacity(1);
            let store = Arc::new(store);
            let barrier = Arc::new(Barrier::new(8));

            let handles: Vec<_> = (0..8)
                .map(|t| {
                    let store = Arc::clone(&store);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        let key = format!("r{round}-t{t}");
                        store.set(key.as_bytes(), key.clone(), None).unwrap();
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
            assert_eq!(store.len(), 1, "round {round}");

            store.set(b"after-1", "a".into(), None).unwrap();
            store.set(b"after-2", "b".into(), None).unwrap();
            assert_eq!(store.len(), 1, "round {round}");
            assert_eq!(store.get(b"after-2").unwrap(), "b");
        }
    }
}
