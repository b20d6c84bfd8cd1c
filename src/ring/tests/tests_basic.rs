#[cfg(test)]
mod tests {
    use crate::ring::HotRing;

    #[test]
    fn get_returns_cached_value() {
        let mut ring = HotRing::new(4);
        ring.set(1, "one".to_string());
        assert_eq!(ring.get(1).as_deref(), Some("one"));
        assert_eq!(ring.get(2), None);
    }

    #[test]
    fn fills_empty_slots_before_evicting() {
        let mut ring = HotRing::new(3);
        ring.set(1, 10);
        ring.set(2, 20);
        ring.set(3, 30);
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.get(1), Some(10));
        assert_eq!(ring.get(2), Some(20));
        assert_eq!(ring.get(3), Some(30));
    }

    #[test]
    fn unreferenced_slot_is_evicted_first() {
        let mut ring = HotRing::new(3);
        ring.set(1, 10);
        ring.set(2, 20);
        ring.set(3, 30);

        // Give 1 and 3 a second chance; 2 stays unreferenced.
        ring.get(1);
        ring.get(3);

        ring.set(4, 40);
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.get(2), None);
        assert_eq!(ring.get(1), Some(10));
        assert_eq!(ring.get(3), Some(30));
        assert_eq!(ring.get(4), Some(40));
    }

    #[test]
    fn all_referenced_degrades_to_fifo() {
        let mut ring = HotRing::new(3);
        ring.set(1, 10);
        ring.set(2, 20);
        ring.set(3, 30);
        ring.get(1);
        ring.get(2);
        ring.get(3);

        // Hand sweeps a full lap clearing bits, then takes slot 0.
        ring.set(4, 40);
        assert_eq!(ring.get(1), None);
        assert_eq!(ring.get(2), Some(20));
        assert_eq!(ring.get(4), Some(40));
    }

    #[test]
    fn second_chance_is_spent_once() {
        let mut ring = HotRing::new(2);
        ring.set(1, 10);
        ring.set(2, 20);
        ring.get(1);

        // 1 loses its bit, 2 is evicted.
        ring.set(3, 30);
        assert_eq!(ring.get(2), None);

        // 1 was not read again, so it goes next.
        ring.set(4, 40);
        assert_eq!(ring.get(1), None);
        assert_eq!(ring.get(3), Some(30));
        assert_eq!(ring.get(4), Some(40));
    }

    #[test]
    fn set_existing_key_replaces_in_place() {
        let mut ring = HotRing::new(2);
        ring.set(1, 10);
        ring.set(1, 11);
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.get(1), Some(11));
    }

    #[test]
    fn removed_slot_is_reused() {
        let mut ring = HotRing::new(2);
        ring.set(1, 10);
        ring.set(2, 20);
        assert!(ring.remove(1));
        assert!(!ring.remove(1));
        assert_eq!(ring.len(), 1);

        ring.set(3, 30);
        assert_eq!(ring.get(2), Some(20));
        assert_eq!(ring.get(3), Some(30));
    }

    #[test]
    fn clear_empties_ring() {
        let mut ring = HotRing::new(4);
        ring.set(1, 10);
        ring.set(2, 20);
        ring.clear();
        assert_eq!(ring.len(), 0);
        assert_eq!(ring.get(1), None);
        assert_eq!(ring.capacity(), 4);
    }

    #[test]
    fn capacity_one_ring() {
        let mut ring = HotRing::new(0);
        assert_eq!(ring.capacity(), 1);
        ring.set(1, 10);
        ring.get(1);
        ring.set(2, 20);
        assert_eq!(ring.get(1), None);
        assert_eq!(ring.get(2), Some(20));
    }
}
