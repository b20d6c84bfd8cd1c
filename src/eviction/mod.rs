//! # Eviction Module
//!
//! Ranks resident keys for capacity eviction.
//!
//! ## EvictionQueue
//!
//! A binary **min-heap** of `(key, frequency, seq)` entries, ordered by
//! ascending frequency and then by ascending `seq`. `seq` is handed out once,
//! when a key is first pushed, so among keys with equal frequency the one
//! queued earliest is evicted first.
//!
//! A side map `key -> heap position` lets a key's priority change in place
//! (`update_at`) in O(log n) instead of a remove + re-insert. Every swap
//! performed while sifting updates the map for **both** swapped entries; the
//! test-only `check_invariants` verifies this after every mutation in the
//! unit tests.
//!
//! ## EvictionPolicy
//!
//! The count-min sketch and the queue, kept together because they are always
//! mutated together and share one process-wide lock in the store.

#[cfg(test)]
mod tests;

use std::collections::HashMap;

use crate::sketch::CountMinSketch;

// ------------------------------------------------------------------------------------------------
// EvictionQueue
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueEntry {
    key: u64,
    freq: u64,
    seq: u64,
}

impl QueueEntry {
    #[inline]
    fn rank(&self) -> (u64, u64) {
        (self.freq, self.seq)
    }
}

#[derive(Debug, Default)]
pub(crate) struct EvictionQueue {
    heap: Vec<QueueEntry>,
    positions: HashMap<u64, usize>,
    next_seq: u64,
}

impl EvictionQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn contains(&self, key: u64) -> bool {
        self.positions.contains_key(&key)
    }

    /// Queues `key` with priority `freq`, or re-ranks it if already queued.
    pub(crate) fn push(&mut self, key: u64, freq: u64) {
        if let Some(&pos) = self.positions.get(&key) {
            self.update_at(pos, freq);
            return;
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        let pos = self.heap.len();
        self.heap.push(QueueEntry { key, freq, seq });
        self.positions.insert(key, pos);
        self.sift_up(pos);
    }

    /// Removes and returns the lowest-ranked `(key, freq)`.
    pub(crate) fn pop_min(&mut self) -> Option<(u64, u64)> {
        if self.heap.is_empty() {
            return None;
        }
        let last = self.heap.len() - 1;
        self.swap(0, last);
        let entry = self.heap.pop()?;
        self.positions.remove(&entry.key);
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        Some((entry.key, entry.freq))
    }

    /// Changes the priority of a queued key. Returns `false` if not queued.
    pub(crate) fn update(&mut self, key: u64, freq: u64) -> bool {
        match self.positions.get(&key) {
            Some(&pos) => {
                self.update_at(pos, freq);
                true
            }
            None => false,
        }
    }

    /// Drops `key` from the queue. Returns `false` if not queued.
    pub(crate) fn remove(&mut self, key: u64) -> bool {
        let Some(pos) = self.positions.get(&key).copied() else {
            return false;
        };
        let last = self.heap.len() - 1;
        self.swap(pos, last);
        self.heap.pop();
        self.positions.remove(&key);

        if pos < self.heap.len() {
            // The entry moved into `pos` may belong above or below it.
            let moved = self.heap[pos].key;
            self.sift_up(pos);
            self.sift_down(self.positions[&moved]);
        }
        true
    }

    /// Sets every queued key to the same frequency, leaving FIFO order.
    pub(crate) fn reset_frequencies(&mut self) {
        for entry in self.heap.iter_mut() {
            entry.freq = 0;
        }
        self.heap.sort_by_key(QueueEntry::rank);
        for (pos, entry) in self.heap.iter().enumerate() {
            self.positions.insert(entry.key, pos);
        }
    }

    // --------------------------------------------------------------------------------------------
    // Heap internals
    // --------------------------------------------------------------------------------------------

    fn update_at(&mut self, pos: usize, freq: u64) {
        let old = self.heap[pos].freq;
        self.heap[pos].freq = freq;
        if freq < old {
            self.sift_up(pos);
        } else if freq > old {
            self.sift_down(pos);
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.heap.swap(a, b);
        self.positions.insert(self.heap[a].key, a);
        self.positions.insert(self.heap[b].key, b);
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.heap[pos].rank() >= self.heap[parent].rank() {
                break;
            }
            self.swap(pos, parent);
            pos = parent;
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;
            let mut smallest = pos;

            if left < len && self.heap[left].rank() < self.heap[smallest].rank() {
                smallest = left;
            }
            if right < len && self.heap[right].rank() < self.heap[smallest].rank() {
                smallest = right;
            }
            if smallest == pos {
                break;
            }
            self.swap(pos, smallest);
            pos = smallest;
        }
    }

    /// Asserts heap order and position-map consistency.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        assert_eq!(self.heap.len(), self.positions.len());
        for (pos, entry) in self.heap.iter().enumerate() {
            assert_eq!(self.positions.get(&entry.key), Some(&pos));
            if pos > 0 {
                let parent = (pos - 1) / 2;
                assert!(self.heap[parent].rank() <= entry.rank());
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// EvictionPolicy
// ------------------------------------------------------------------------------------------------

/// Frequency sketch plus eviction queue, guarded together by the store.
pub(crate) struct EvictionPolicy {
    sketch: CountMinSketch,
    queue: EvictionQueue,
}

impl EvictionPolicy {
    pub(crate) fn new(sketch_width: usize) -> Self {
        Self {
            sketch: CountMinSketch::new(sketch_width),
            queue: EvictionQueue::new(),
        }
    }

    /// A write counts as an access and (re-)queues the key.
    pub(crate) fn record_write(&mut self, key: u64) {
        self.sketch.increment(key);
        let freq = self.sketch.estimate(key);
        self.queue.push(key, freq);
    }

    /// A read bumps the sketch and re-ranks the key if it is still queued.
    pub(crate) fn record_access(&mut self, key: u64) {
        self.sketch.increment(key);
        if self.queue.contains(key) {
            let freq = self.sketch.estimate(key);
            self.queue.update(key, freq);
        }
    }

    /// Removes and returns the lowest-ranked key other than `spare`.
    ///
    /// If `spare` ranks lowest it is queued again, behind every key of the
    /// same frequency.
    pub(crate) fn pop_victim(&mut self, spare: Option<u64>) -> Option<u64> {
        let (first, freq) = self.queue.pop_min()?;
        if Some(first) != spare {
            return Some(first);
        }
        let next = self.queue.pop_min().map(|(key, _)| key);
        self.queue.push(first, freq);
        next
    }

    pub(crate) fn forget(&mut self, key: u64) {
        self.queue.remove(key);
    }

    pub(crate) fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Forgets all frequency history.
    pub(crate) fn reset(&mut self) {
        self.sketch.clear();
        self.queue.reset_frequencies();
    }

    #[cfg(test)]
    pub(crate) fn queue(&self) -> &EvictionQueue {
        &self.queue
    }
}
