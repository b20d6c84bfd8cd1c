//! # Frequency Sketch
//!
//! A fixed-memory **count-min sketch** estimating how often each key has been
//! touched. The estimate feeds the eviction queue: the key with the smallest
//! estimate is the first to go when the store is full.
//!
//! ## Layout
//!
//! ```text
//! row 0: [c0][c1][c2] ... [c(width-1)]   <- xxh64(hash, seed0) % width
//! row 1: [c0][c1][c2] ... [c(width-1)]   <- xxh64(hash, seed1) % width
//! row 2: [c0][c1][c2] ... [c(width-1)]   <- xxh64(hash, seed2) % width
//! ```
//!
//! `increment` bumps one counter per row; `estimate` returns the minimum of
//! the three. Collisions can only inflate a counter, so the estimate never
//! under-counts, but it may over-count.
//!
//! There is no aging. Counters only grow until [`CountMinSketch::clear`] is
//! called, so a key that was hot long ago keeps its rank.


use crate::hash::rehash;

/// Number of independent hash rows.
pub(crate) const SKETCH_DEPTH: usize = 3;

pub(crate) struct CountMinSketch {
    width: usize,
    rows: [Vec<u64>; SKETCH_DEPTH],
    seeds: [u64; SKETCH_DEPTH],
}

impl CountMinSketch {
    /// Creates a sketch with `width` counters per row and random row seeds.
    pub(crate) fn new(width: usize) -> Self {
        let width = width.max(1);
        Self {
            width,
            rows: std::array::from_fn(|_| vec![0; width]),
            seeds: std::array::from_fn(|_| rand::random()),
        }
    }

    #[inline]
    fn slot(&self, row: usize, hash: u64) -> usize {
        (rehash(hash, self.seeds[row]) % self.width as u64) as usize
    }

    /// Records one access of `hash`.
    pub(crate) fn increment(&mut self, hash: u64) {
        for row in 0..SKETCH_DEPTH {
            let slot = self.slot(row, hash);
            let counter = &mut self.rows[row][slot];
            *counter = counter.saturating_add(1);
        }
    }

    /// Returns the upper-bound access count for `hash`.
    pub(crate) fn estimate(&self, hash: u64) -> u64 {
        (0..SKETCH_DEPTH)
            .map(|row| self.rows[row][self.slot(row, hash)])
            .min()
            .unwrap_or(0)
    }

    /// Zeroes every counter. Seeds are kept.
    pub(crate) fn clear(&mut self) {
        for row in self.rows.iter_mut() {
            row.iter_mut().for_each(|c| *c = 0);
        }
    }

    #[cfg(test)]
    pub(crate) fn width(&self) -> usize {
        self.width
    }
}
