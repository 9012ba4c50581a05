use serde::Serialize;

use crate::{
    cache::{Cache, Op},
    config::CacheConfig,
    error::ConfigError,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HierarchyStats {
    pub l1_prefetch_dem_hits: u64,
    pub l2_prefetch_dem_hits: u64,
}

/// L1 backed by L2 backed by an infinite memory.
///
/// Levels only talk to each other through explicit fills and writebacks; a
/// dirty L1 victim is merged into L2 before it is dropped.
#[derive(Debug, Clone)]
pub struct CacheHierarchy {
    l1: Cache,
    l2: Cache,
    stats: HierarchyStats,
}

impl CacheHierarchy {
    pub fn new(l1: CacheConfig, l2: CacheConfig) -> Result<Self, ConfigError> {
        Ok(CacheHierarchy {
            l1: Cache::new(l1)?,
            l2: Cache::new(l2)?,
            stats: HierarchyStats::default(),
        })
    }

    pub fn reset(&mut self) {
        self.l1.reset();
        self.l2.reset();
        self.stats = HierarchyStats::default();
    }

    pub fn clear_stats(&mut self) {
        self.l1.clear_stats();
        self.l2.clear_stats();
        self.stats = HierarchyStats::default();
    }

    pub fn l1(&self) -> &Cache {
        &self.l1
    }

    pub fn l2(&self) -> &Cache {
        &self.l2
    }

    pub fn stats(&self) -> &HierarchyStats {
        &self.stats
    }

    /// Like [`CacheHierarchy::access`] for a raw trace code; anything other
    /// than `r`/`w` is ignored and reported as `false`.
    pub fn access_code(&mut self, code: char, addr: u64) -> bool {
        match Op::from_code(code) {
            Some(op) => {
                self.access(op, addr);
                true
            }
            None => false,
        }
    }

    /// Runs one demand access to completion.
    pub fn access(&mut self, op: Op, addr: u64) {
        // A block waiting in L1's prefetch buffer is promoted into L1 and the
        // access is then served from there.
        let l1_blk = self.l1.block_addr(addr);
        if self.l1.prefetch_buffer().enabled() && self.l1.prefetch_hit_consume(l1_blk) {
            self.stats.l1_prefetch_dem_hits += 1;

            let res = self.l1.fill(addr, false);
            if let Some(victim) = res.dirty_victim() {
                self.l2.writeback_block(victim);
            }

            let _ = self.l1.access(op, addr);
            next_line_prefetch(&mut self.l1, addr);
            return;
        }

        if self.l1.access(op, addr).hit {
            next_line_prefetch(&mut self.l1, addr);
            return;
        }

        // No-write-allocate writes go around L1.
        let l1_allocates = !op.is_write() || self.l1.config().is_write_allocate();

        let l2_blk = self.l2.block_addr(addr);
        if self.l2.prefetch_buffer().enabled() && self.l2.prefetch_hit_consume(l2_blk) {
            self.stats.l2_prefetch_dem_hits += 1;
            // A victim displaced by this fill is not written back anywhere.
            let _ = self.l2.fill(addr, false);
        }

        if !self.l2.access(op, addr).hit {
            // Memory always has the block.
            let dirty = op.is_write() && self.l2.config().is_write_allocate();
            let _ = self.l2.fill(addr, dirty);
        }
        next_line_prefetch(&mut self.l2, addr);

        if l1_allocates {
            let dirty = op.is_write() && self.l1.config().is_write_allocate();
            let res = self.l1.fill(addr, dirty);
            if let Some(victim) = res.dirty_victim() {
                log::trace!("L1 victim {victim:#x} written back to L2");
                self.l2.writeback_block(victim);
            }
        }
        next_line_prefetch(&mut self.l1, addr);
    }
}

fn next_line_prefetch(cache: &mut Cache, addr: u64) {
    if !cache.config().next_line_prefetch || cache.config().prefetch_buf_entries == 0 {
        return;
    }
    let next = cache.next_block_addr(addr);
    cache.prefetch_push(next);
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        cache::CacheStats,
        config::{AllocatePolicy, WritePolicy},
    };

    fn level(name: &str, size_bytes: usize, assoc: usize) -> CacheConfig {
        CacheConfig {
            name: name.to_string(),
            size_bytes,
            block_bytes: 64,
            assoc,
            ..CacheConfig::l1()
        }
    }

    fn small() -> CacheHierarchy {
        CacheHierarchy::new(level("L1", 256, 1), level("L2", 1024, 2)).unwrap()
    }

    #[test]
    fn invalid_level_fails_construction() {
        let err = CacheHierarchy::new(level("L1", 256, 1), level("L2", 1000, 2)).unwrap_err();
        assert_eq!(err.level(), "L2");
    }

    #[test]
    fn read_miss_fills_both_levels() {
        let mut h = small();
        h.access(Op::Read, 0x40);
        assert!(h.l1().probe(0x40).is_some());
        assert!(h.l2().probe(0x40).is_some());
        assert_eq!(h.l1().stats().read_misses, 1);
        assert_eq!(h.l2().stats().read_misses, 1);

        h.access(Op::Read, 0x40);
        assert_eq!(h.l1().stats().read_hits, 1);
        // L2 sees nothing on an L1 hit.
        assert_eq!(h.l2().stats().reads, 1);
    }

    #[test]
    fn dirty_l1_victim_is_written_back_into_l2() {
        let mut h = small();
        h.access(Op::Write, 0);
        assert!(h.l1().probe(0).unwrap().dirty);
        // L2 is write-allocate, so its copy is dirty too.
        assert!(h.l2().probe(0).unwrap().dirty);

        h.access(Op::Read, 1024);
        assert_eq!(h.l1().stats().evictions, 1);
        assert_eq!(h.l1().stats().writebacks, 1);
        assert!(h.l2().probe(0).unwrap().dirty);
        assert_eq!(h.l2().stats().writes, 1);
    }

    #[test]
    fn clean_l1_victim_is_dropped() {
        let mut h = small();
        h.access(Op::Read, 0);
        h.access(Op::Read, 1024);
        assert_eq!(h.l1().stats().evictions, 1);
        assert_eq!(h.l1().stats().writebacks, 0);
        assert!(!h.l2().probe(0).unwrap().dirty);
    }

    #[test]
    fn write_through_never_writes_back() {
        let mut l1 = level("L1", 256, 1);
        l1.write_policy = WritePolicy::WriteThrough;
        let mut h = CacheHierarchy::new(l1, level("L2", 1024, 2)).unwrap();
        h.access(Op::Write, 0);
        h.access(Op::Write, 0);
        h.access(Op::Write, 1024);
        assert_eq!(h.l1().stats().evictions, 1);
        assert_eq!(h.l1().stats().writebacks, 0);
    }

    #[test]
    fn no_write_allocate_bypasses_l1() {
        let mut l1 = level("L1", 256, 1);
        l1.allocate_policy = AllocatePolicy::NoWriteAllocate;
        let mut h = CacheHierarchy::new(l1, level("L2", 1024, 2)).unwrap();

        h.access(Op::Write, 0x80);
        assert_eq!(h.l1().resident_lines(), 0);
        assert_eq!(h.l1().stats().write_misses, 1);
        assert_eq!(h.l2().stats().write_misses, 1);
        assert!(h.l2().probe(0x80).unwrap().dirty);

        // Reads still allocate; the line comes in clean.
        h.access(Op::Read, 0x80);
        assert!(!h.l1().probe(0x80).unwrap().dirty);
        assert_eq!(h.l2().stats().read_hits, 1);
    }

    #[test]
    fn no_write_allocate_l2_still_fills_clean() {
        let mut l2 = level("L2", 1024, 2);
        l2.allocate_policy = AllocatePolicy::NoWriteAllocate;
        let mut h = CacheHierarchy::new(level("L1", 256, 1), l2).unwrap();
        h.access(Op::Write, 0);
        assert!(!h.l2().probe(0).unwrap().dirty);
        assert!(h.l1().probe(0).unwrap().dirty);
    }

    #[test]
    fn next_line_prefetch_needs_flag_and_buffer() {
        let mut flag_only = level("L1", 256, 1);
        flag_only.next_line_prefetch = true;
        let mut h = CacheHierarchy::new(flag_only, level("L2", 1024, 2)).unwrap();
        h.access(Op::Read, 0);
        assert_eq!(h.l1().prefetch_stats().issued, 0);

        let mut buffer_only = level("L1", 256, 1);
        buffer_only.prefetch_buf_entries = 4;
        let mut h = CacheHierarchy::new(buffer_only, level("L2", 1024, 2)).unwrap();
        h.access(Op::Read, 0);
        assert_eq!(h.l1().prefetch_stats().issued, 0);
    }

    #[test]
    fn l1_prefetch_hit_promotes_block() {
        let mut l1 = level("L1", 256, 1);
        l1.prefetch_buf_entries = 4;
        l1.next_line_prefetch = true;
        let mut h = CacheHierarchy::new(l1, level("L2", 1024, 2)).unwrap();

        h.access(Op::Read, 0);
        assert!(h.l1().prefetch_buffer().contains(1));

        h.access(Op::Write, 64);
        assert_eq!(h.stats().l1_prefetch_dem_hits, 1);
        assert_eq!(h.l1().prefetch_stats().hits, 1);
        // Served by L1 alone: a hit after the promotion, L2 untouched.
        assert_eq!(h.l1().stats().write_hits, 1);
        assert_eq!(h.l2().stats().writes, 0);
        assert!(h.l1().probe(64).unwrap().dirty);
        assert!(h.l1().prefetch_buffer().contains(2));
    }

    #[test]
    fn l1_prefetch_hit_writes_back_dirty_victim() {
        let mut l1 = level("L1", 256, 1);
        l1.prefetch_buf_entries = 4;
        l1.next_line_prefetch = true;
        let mut h = CacheHierarchy::new(l1, level("L2", 1024, 2)).unwrap();

        // Block 15 sits in set 3; its next line, block 16, maps to set 0.
        h.access(Op::Write, 0);
        h.access(Op::Read, 15 * 64);
        assert!(h.l1().prefetch_buffer().contains(16));

        h.access(Op::Read, 16 * 64);
        assert_eq!(h.stats().l1_prefetch_dem_hits, 1);
        assert_eq!(h.l1().stats().writebacks, 1);
        assert!(h.l2().probe(0).unwrap().dirty);
        assert!(h.l1().probe(16 * 64).is_some());
    }

    #[test]
    fn l2_prefetch_hit_is_counted_and_filled() {
        let mut l2 = level("L2", 1024, 2);
        l2.prefetch_buf_entries = 2;
        l2.next_line_prefetch = true;
        let mut h = CacheHierarchy::new(level("L1", 256, 1), l2).unwrap();

        h.access(Op::Read, 0);
        assert!(h.l2().prefetch_buffer().contains(1));

        h.access(Op::Read, 64);
        assert_eq!(h.stats().l2_prefetch_dem_hits, 1);
        assert_eq!(h.l2().stats().read_hits, 1);
        assert_eq!(h.l2().stats().read_misses, 1);
        assert!(h.l1().probe(64).is_some());
    }

    #[test]
    fn l2_prefetch_hit_fill_discards_dirty_victim() {
        // Single-set, single-way L2: every fill evicts.
        let mut l2 = level("L2", 64, 1);
        l2.prefetch_buf_entries = 2;
        l2.next_line_prefetch = true;
        let mut h = CacheHierarchy::new(level("L1", 256, 1), l2).unwrap();

        h.access(Op::Write, 0);
        assert!(h.l2().probe(0).unwrap().dirty);
        h.access(Op::Read, 64);

        assert_eq!(h.stats().l2_prefetch_dem_hits, 1);
        // The dirty block 0 was displaced by the prefetch fill.
        assert_eq!(h.l2().stats().evictions, 1);
        assert_eq!(h.l2().stats().writebacks, 1);
        assert!(h.l2().probe(0).is_none());
    }

    #[test]
    fn unknown_op_code_is_ignored() {
        let mut h = small();
        assert!(!h.access_code('x', 0));
        assert_eq!(*h.l1().stats(), CacheStats::default());
        assert!(h.access_code('R', 0));
        assert_eq!(h.l1().stats().reads, 1);
    }

    #[test]
    fn reset_and_clear_stats() {
        let mut l1 = level("L1", 256, 1);
        l1.prefetch_buf_entries = 2;
        l1.next_line_prefetch = true;
        let mut h = CacheHierarchy::new(l1, level("L2", 1024, 2)).unwrap();
        h.access(Op::Read, 0);
        h.access(Op::Read, 64);

        h.clear_stats();
        assert_eq!(*h.stats(), HierarchyStats::default());
        assert_eq!(h.l1().stats().reads, 0);
        assert!(h.l1().probe(0).is_some());

        h.reset();
        assert_eq!(h.l1().resident_lines(), 0);
        assert_eq!(h.l2().resident_lines(), 0);
        assert!(h.l1().prefetch_buffer().is_empty());
    }
}
