//! Bounded, time-windowed dedup store for inbound packets.
//!
//! A `HashSet` plus a `VecDeque` tracking insertion order gives FIFO
//! eviction at capacity; a wall-clock age on each entry additionally
//! expires entries after `window` regardless of capacity pressure.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

pub type DedupKey = [u8; 24];

struct Entry {
    key: DedupKey,
    inserted_at: Instant,
}

/// Tracks recently seen dedup keys so a flooded broadcast is relayed and
/// delivered only once per node.
pub struct DedupStore {
    set: HashSet<DedupKey>,
    order: VecDeque<Entry>,
    capacity: usize,
    window: Duration,
}

impl DedupStore {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self { set: HashSet::with_capacity(capacity), order: VecDeque::with_capacity(capacity), capacity, window }
    }

    /// Returns `true` if `key` was newly inserted (i.e. this packet should
    /// be processed); `false` if it is a duplicate already tracked.
    pub fn insert(&mut self, key: DedupKey) -> bool {
        self.expire_old();
        if self.set.contains(&key) {
            return false;
        }
        if self.set.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest.key);
            }
        }
        self.set.insert(key);
        self.order.push_back(Entry { key, inserted_at: Instant::now() });
        true
    }

    pub fn contains(&self, key: &DedupKey) -> bool {
        self.set.contains(key)
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    fn expire_old(&mut self) {
        while let Some(front) = self.order.front() {
            if front.inserted_at.elapsed() > self.window {
                let expired = self.order.pop_front().unwrap();
                self.set.remove(&expired.key);
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_insert_of_same_key_is_duplicate() {
        let mut store = DedupStore::new(1024, Duration::from_secs(60));
        assert!(store.insert([1; 24]));
        assert!(!store.insert([1; 24]));
    }

    #[test]
    fn eviction_is_fifo_once_at_capacity() {
        let mut store = DedupStore::new(2, Duration::from_secs(60));
        assert!(store.insert([1; 24]));
        assert!(store.insert([2; 24]));
        assert!(store.insert([3; 24]));
        assert!(!store.contains(&[1; 24]));
        assert!(store.contains(&[2; 24]));
        assert!(store.contains(&[3; 24]));
    }
}
