//! # Hot Ring
//!
//! A fixed-capacity **second-chance (CLOCK)** cache sitting in front of the
//! persistent log. It holds decoded values for recently read keys so repeat
//! reads skip the file entirely.
//!
//! ```text
//!            hand
//!             v
//!   [k3,v,1][k7,v,0][k1,v,1][ empty ][k9,v,0]
//! ```
//!
//! - `get` finds a slot through the side index in O(1) and sets its
//!   reference bit.
//! - `set` of a new key starts at the hand. Slots with the bit set get it
//!   cleared and are skipped; the first empty slot or slot with a clear bit
//!   is overwritten, and the hand moves past it.
//!
//! Every slot is passed over at most twice, so the worst-case cost of one
//! insertion is bounded by twice the capacity.

#[cfg(test)]
mod tests;

use std::collections::HashMap;

#[derive(Debug)]
struct Slot<V> {
    key: u64,
    value: V,
    referenced: bool,
}

#[derive(Debug)]
pub(crate) struct HotRing<V> {
    slots: Vec<Option<Slot<V>>>,
    index: HashMap<u64, usize>,
    hand: usize,
}

impl<V: Clone> HotRing<V> {
    /// Creates a ring with `capacity` slots (minimum one).
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            index: HashMap::with_capacity(capacity),
            hand: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns a copy of the cached value and marks the slot as recently used.
    pub(crate) fn get(&mut self, key: u64) -> Option<V> {
        let pos = *self.index.get(&key)?;
        let slot = self.slots[pos].as_mut()?;
        slot.referenced = true;
        Some(slot.value.clone())
    }

    /// Caches `value` under `key`, evicting by second chance if needed.
    pub(crate) fn set(&mut self, key: u64, value: V) {
        if let Some(&pos) = self.index.get(&key) {
            if let Some(slot) = self.slots[pos].as_mut() {
                slot.value = value;
                slot.referenced = false;
                return;
            }
        }

        let pos = self.claim_slot();
        self.slots[pos] = Some(Slot {
            key,
            value,
            referenced: false,
        });
        self.index.insert(key, pos);
        self.hand = (pos + 1) % self.slots.len();
    }

    /// Drops `key` from the ring, leaving its slot empty.
    pub(crate) fn remove(&mut self, key: u64) -> bool {
        match self.index.remove(&key) {
            Some(pos) => {
                self.slots[pos] = None;
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.index.clear();
        self.hand = 0;
    }

    /// Advances the hand to the next replaceable slot and vacates it.
    fn claim_slot(&mut self) -> usize {
        loop {
            let pos = self.hand;
            match self.slots[pos].as_mut() {
                None => return pos,
                Some(slot) if slot.referenced => {
                    slot.referenced = false;
                    self.hand = (pos + 1) % self.slots.len();
                }
                Some(slot) => {
                    self.index.remove(&slot.key);
                    self.slots[pos] = None;
                    return pos;
                }
            }
        }
    }
}
