//! Bounded memory of recently delivered message hashes.

use std::collections::{HashSet, VecDeque};

/// FIFO set of structural hashes.
///
/// Once full, inserting evicts the oldest hash. A capacity of zero
/// remembers nothing, so every message counts as new.
#[derive(Debug, Clone)]
pub struct History {
    capacity: usize,
    order: VecDeque<u64>,
    seen: HashSet<u64>,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity.min(1024)),
            seen: HashSet::with_capacity(capacity.min(1024)),
        }
    }

    /// Records `hash`. Returns `false` if it was already remembered.
    pub fn insert(&mut self, hash: u64) -> bool {
        if self.capacity == 0 {
            return true;
        }
        if !self.seen.insert(hash) {
            return false;
        }
        self.order.push_back(hash);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    pub fn contains(&self, hash: u64) -> bool {
        self.seen.contains(&hash)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
