use std::collections::{HashSet, VecDeque};

use serde::Serialize;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PrefetchStats {
    pub issued: u64,
    /// Demand accesses that found their block waiting in the buffer.
    pub hits: u64,
    /// Entries pushed out by a newer prefetch while the buffer was full.
    pub drops: u64,
}

/// Bounded FIFO of prefetched block addresses (already shifted by the block
/// offset). A capacity of 0 turns every operation into a no-op.
#[derive(Debug, Clone)]
pub struct PrefetchBuffer {
    capacity: usize,
    fifo: VecDeque<u64>,
    present: HashSet<u64>,
    stats: PrefetchStats,
}

impl PrefetchBuffer {
    pub fn new(capacity: usize) -> Self {
        PrefetchBuffer {
            capacity,
            fifo: VecDeque::new(),
            present: HashSet::new(),
            stats: PrefetchStats::default(),
        }
    }

    pub fn reset(&mut self) {
        self.fifo.clear();
        self.present.clear();
        self.stats = PrefetchStats::default();
    }

    pub fn clear_stats(&mut self) {
        self.stats = PrefetchStats::default();
    }

    pub fn enabled(&self) -> bool {
        self.capacity > 0
    }

    pub fn push(&mut self, block_addr: u64) {
        if !self.enabled() || self.present.contains(&block_addr) {
            return;
        }

        self.stats.issued += 1;

        if self.fifo.len() >= self.capacity {
            if let Some(oldest) = self.fifo.pop_front() {
                self.present.remove(&oldest);
                self.stats.drops += 1;
            }
        }
        self.fifo.push_back(block_addr);
        self.present.insert(block_addr);
    }

    pub fn consume_if_present(&mut self, block_addr: u64) -> bool {
        if !self.enabled() || !self.present.remove(&block_addr) {
            return false;
        }

        // Linear in capacity, which stays in the single/double digits.
        if let Some(idx) = self.fifo.iter().position(|&b| b == block_addr) {
            self.fifo.remove(idx);
        }
        self.stats.hits += 1;
        true
    }

    pub fn contains(&self, block_addr: u64) -> bool {
        self.present.contains(&block_addr)
    }

    pub fn len(&self) -> usize {
        self.fifo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fifo.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queued block addresses, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.fifo.iter().copied()
    }

    pub fn stats(&self) -> &PrefetchStats {
        &self.stats
    }
}
