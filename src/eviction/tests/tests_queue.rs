#[cfg(test)]
mod tests {
    use crate::eviction::EvictionQueue;

    fn drain(queue: &mut EvictionQueue) -> Vec<u64> {
        let mut out = Vec::new();
        while let Some((key, _)) = queue.pop_min() {
            queue.check_invariants();
            out.push(key);
        }
        out
    }

    #[test]
    fn pops_in_ascending_frequency() {
        let mut queue = EvictionQueue::new();
        queue.push(1, 30);
        queue.push(2, 10);
        queue.push(3, 20);
        queue.push(4, 5);
        queue.check_invariants();

        assert_eq!(drain(&mut queue), vec![4, 2, 3, 1]);
    }

    #[test]
    fn equal_frequencies_pop_in_insertion_order() {
        let mut queue = EvictionQueue::new();
        for key in [50, 10, 40, 20, 30] {
            queue.push(key, 1);
        }

        assert_eq!(drain(&mut queue), vec![50, 10, 40, 20, 30]);
    }

    #[test]
    fn push_existing_key_updates_in_place() {
        let mut queue = EvictionQueue::new();
        queue.push(1, 1);
        queue.push(2, 1);
        queue.push(1, 9);
        queue.check_invariants();

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_min(), Some((2, 1)));
        assert_eq!(queue.pop_min(), Some((1, 9)));
    }

    #[test]
    fn update_keeps_original_sequence_for_ties() {
        let mut queue = EvictionQueue::new();
        queue.push(1, 5);
        queue.push(2, 1);
        // Key 1 drops to the same frequency as key 2 but was queued first.
        assert!(queue.update(1, 1));
        queue.check_invariants();

        assert_eq!(queue.pop_min(), Some((1, 1)));
        assert_eq!(queue.pop_min(), Some((2, 1)));
    }

    #[test]
    fn update_missing_key_is_rejected() {
        let mut queue = EvictionQueue::new();
        assert!(!queue.update(7, 3));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn remove_from_middle_keeps_heap_valid() {
        let mut queue = EvictionQueue::new();
        for key in 0..64u64 {
            queue.push(key, (key * 37) % 11);
        }
        for key in (0..64u64).step_by(3) {
            assert!(queue.remove(key));
            queue.check_invariants();
        }
        assert!(!queue.remove(0));

        let drained = drain(&mut queue);
        assert_eq!(drained.len(), 64 - 22);
        assert!(drained.iter().all(|k| k % 3 != 0));
    }

    #[test]
    fn positions_survive_many_random_updates() {
        let mut queue = EvictionQueue::new();
        for key in 0..200u64 {
            queue.push(key, key % 13);
        }
        for round in 0..1_000u64 {
            let key = (round * 7919) % 200;
            queue.update(key, (round * 31) % 17);
            if round % 50 == 0 {
                queue.check_invariants();
            }
        }
        queue.check_invariants();

        let mut last = (0, 0);
        while let Some((key, freq)) = queue.pop_min() {
            assert!(freq >= last.1, "key {key} popped out of order after {last:?}");
            last = (key, freq);
        }
    }

    #[test]
    fn reset_frequencies_falls_back_to_fifo() {
        let mut queue = EvictionQueue::new();
        queue.push(1, 100);
        queue.push(2, 3);
        queue.push(3, 50);
        queue.reset_frequencies();
        queue.check_invariants();

        assert_eq!(drain(&mut queue), vec![1, 2, 3]);
    }

    #[test]
    fn pop_empty_queue() {
        let mut queue = EvictionQueue::new();
        assert_eq!(queue.pop_min(), None);
    }
}
