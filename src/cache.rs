use std::ops::Range;

use serde::Serialize;

use crate::{
    config::{CacheConfig, Geometry},
    error::ConfigError,
    prefetch::{PrefetchBuffer, PrefetchStats},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Op {
    Read,
    Write,
}

impl Op {
    /// Single-letter trace code, `r`/`w` in either case.
    pub fn from_code(code: char) -> Option<Op> {
        match code {
            'r' | 'R' => Some(Op::Read),
            'w' | 'W' => Some(Op::Write),
            _ => None,
        }
    }

    pub fn is_write(self) -> bool {
        self == Op::Write
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Addr {
    pub set: usize,
    pub tag: u64,
}

#[derive(Debug, Clone, Copy)]
struct BitSection {
    shift: u32,
    mask: u64,
}

impl BitSection {
    fn apply(&self, num: u64) -> u64 {
        (num >> self.shift) & self.mask
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub reads: u64,
    pub writes: u64,
    pub read_hits: u64,
    pub read_misses: u64,
    pub write_hits: u64,
    pub write_misses: u64,
    pub evictions: u64,
    /// Dirty evictions under write-back.
    pub writebacks: u64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.read_hits + self.write_hits
    }

    pub fn misses(&self) -> u64 {
        self.read_misses + self.write_misses
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evicted {
    pub block_addr: u64,
    /// The victim held data newer than the next level (write-back only).
    pub dirty: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AccessResult {
    pub hit: bool,
    pub evicted: Option<Evicted>,
}

impl AccessResult {
    fn hit() -> Self {
        AccessResult {
            hit: true,
            evicted: None,
        }
    }

    fn miss() -> Self {
        AccessResult::default()
    }

    /// The evicted block, if it has to be written back to the next level.
    pub fn dirty_victim(&self) -> Option<u64> {
        self.evicted.filter(|e| e.dirty).map(|e| e.block_addr)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Line {
    valid: bool,
    dirty: bool,
    tag: u64,
    last_use: u64,
}

/// Read-only view of a resident line, see [`Cache::probe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineView {
    pub way: usize,
    pub tag: u64,
    pub dirty: bool,
    pub last_use: u64,
}

/// One set-associative cache level with true LRU replacement.
///
/// Lines live in a flat array, set `s` occupying `s * n_ways..(s + 1) * n_ways`.
/// Demand accesses never allocate; installing a block is always an explicit
/// [`Cache::fill`] or [`Cache::writeback_block`] by the caller.
#[derive(Debug, Clone)]
pub struct Cache {
    config: CacheConfig,
    geometry: Geometry,
    lines: Vec<Line>,
    set_sec: BitSection,
    tag_sec: BitSection,
    use_counter: u64,
    stats: CacheStats,
    pfb: PrefetchBuffer,
}

impl Cache {
    pub fn new(config: CacheConfig) -> Result<Self, ConfigError> {
        let geometry = config.validate()?;
        log::debug!(
            "{}: {} sets x {} ways, {} offset bits, {} index bits",
            config.name,
            geometry.n_sets,
            geometry.n_ways,
            geometry.offset_bits,
            geometry.index_bits
        );

        let set_sec = BitSection {
            shift: geometry.offset_bits,
            mask: geometry.n_sets as u64 - 1,
        };
        let tag_sec = BitSection {
            shift: geometry.offset_bits + geometry.index_bits,
            mask: u64::MAX,
        };

        Ok(Cache {
            lines: vec![Line::default(); geometry.n_sets * geometry.n_ways],
            pfb: PrefetchBuffer::new(config.prefetch_buf_entries),
            config,
            geometry,
            set_sec,
            tag_sec,
            use_counter: 0,
            stats: CacheStats::default(),
        })
    }

    /// Back to the post-construction state: every line invalid, counters and
    /// statistics zeroed, prefetch buffer emptied.
    pub fn reset(&mut self) {
        self.lines.fill(Line::default());
        self.use_counter = 0;
        self.stats = CacheStats::default();
        self.pfb.reset();
    }

    /// Zeroes statistics but keeps contents, LRU state and queued prefetches.
    pub fn clear_stats(&mut self) {
        self.stats = CacheStats::default();
        self.pfb.clear_stats();
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn num_sets(&self) -> usize {
        self.geometry.n_sets
    }

    pub fn num_ways(&self) -> usize {
        self.geometry.n_ways
    }

    pub fn offset_bits(&self) -> u32 {
        self.geometry.offset_bits
    }

    pub fn index_bits(&self) -> u32 {
        self.geometry.index_bits
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn prefetch_stats(&self) -> &PrefetchStats {
        self.pfb.stats()
    }

    pub fn prefetch_buffer(&self) -> &PrefetchBuffer {
        &self.pfb
    }

    pub fn prefetch_hit_consume(&mut self, block_addr: u64) -> bool {
        self.pfb.consume_if_present(block_addr)
    }

    pub fn prefetch_push(&mut self, block_addr: u64) {
        self.pfb.push(block_addr)
    }

    pub fn block_addr(&self, byte_addr: u64) -> u64 {
        byte_addr >> self.geometry.offset_bits
    }

    pub fn next_block_addr(&self, byte_addr: u64) -> u64 {
        self.block_addr(byte_addr).wrapping_add(1)
    }

    pub fn split_addr(&self, byte_addr: u64) -> Addr {
        Addr {
            set: self.set_sec.apply(byte_addr) as usize,
            tag: self.tag_sec.apply(byte_addr),
        }
    }

    /// Inverse of [`Cache::split_addr`] down to block granularity.
    pub fn block_addr_of(&self, tag: u64, set: usize) -> u64 {
        (tag << self.geometry.index_bits) | set as u64
    }

    fn get_set(&self, set: usize) -> Range<usize> {
        let ways = self.num_ways();
        set * ways..(set + 1) * ways
    }

    fn find_way(&self, addr: Addr) -> Option<usize> {
        self.lines[self.get_set(addr.set)]
            .iter()
            .position(|l| l.valid && l.tag == addr.tag)
    }

    /// First invalid way, else the smallest `last_use` with ties kept at the
    /// lowest way.
    fn choose_victim(&self, set: usize) -> usize {
        let set_slice = &self.lines[self.get_set(set)];
        if let Some(way) = set_slice.iter().position(|l| !l.valid) {
            return way;
        }

        let mut victim = 0;
        let mut best = set_slice[0].last_use;
        for (way, line) in set_slice.iter().enumerate().skip(1) {
            if line.last_use < best {
                best = line.last_use;
                victim = way;
            }
        }
        victim
    }

    fn line_mut(&mut self, set: usize, way: usize) -> &mut Line {
        &mut self.lines[set * self.geometry.n_ways + way]
    }

    fn install(&mut self, addr: Addr, way: usize, dirty: bool) -> AccessResult {
        let write_back = self.config.is_write_back();
        let index_bits = self.geometry.index_bits;
        let now = self.use_counter;
        let line = self.line_mut(addr.set, way);

        let evicted = line.valid.then(|| Evicted {
            block_addr: (line.tag << index_bits) | addr.set as u64,
            dirty: write_back && line.dirty,
        });

        *line = Line {
            valid: true,
            dirty,
            tag: addr.tag,
            last_use: now,
        };

        if let Some(ev) = evicted {
            self.stats.evictions += 1;
            if ev.dirty {
                self.stats.writebacks += 1;
            }
            log::trace!(
                "{}: evicted block {:#x} (dirty={}) from set {} way {}",
                self.config.name,
                ev.block_addr,
                ev.dirty,
                addr.set,
                way
            );
        }

        AccessResult {
            hit: false,
            evicted,
        }
    }

    /// Demand access from the level above. Counts the access, updates LRU and
    /// the dirty bit on a hit, and leaves the cache untouched on a miss.
    pub fn access(&mut self, op: Op, byte_addr: u64) -> AccessResult {
        self.use_counter += 1;
        match op {
            Op::Read => self.stats.reads += 1,
            Op::Write => self.stats.writes += 1,
        }

        let addr = self.split_addr(byte_addr);
        let Some(way) = self.find_way(addr) else {
            match op {
                Op::Read => self.stats.read_misses += 1,
                Op::Write => self.stats.write_misses += 1,
            }
            return AccessResult::miss();
        };

        let write_back = self.config.is_write_back();
        let now = self.use_counter;
        let line = self.line_mut(addr.set, way);
        line.last_use = now;
        match op {
            Op::Read => self.stats.read_hits += 1,
            Op::Write => {
                // Write-through leaves the memory write to the caller.
                if write_back {
                    line.dirty = true;
                }
                self.stats.write_hits += 1;
            }
        }
        AccessResult::hit()
    }

    /// Installs the block holding `byte_addr`, e.g. data returned by the next
    /// level. A block that is already resident is only touched.
    pub fn fill(&mut self, byte_addr: u64, make_dirty: bool) -> AccessResult {
        self.use_counter += 1;
        let dirty = make_dirty && self.config.is_write_back();
        self.place(self.split_addr(byte_addr), dirty)
    }

    /// Absorbs a dirty block evicted from the level above. Not a demand
    /// access, so hit/miss statistics are untouched; a victim displaced here
    /// is counted but not propagated any further.
    pub fn writeback_block(&mut self, block_addr: u64) {
        self.use_counter += 1;
        let byte_addr = block_addr << self.geometry.offset_bits;
        let dirty = self.config.is_write_back();
        let _ = self.place(self.split_addr(byte_addr), dirty);
    }

    fn place(&mut self, addr: Addr, dirty: bool) -> AccessResult {
        if let Some(way) = self.find_way(addr) {
            let now = self.use_counter;
            let line = self.line_mut(addr.set, way);
            line.last_use = now;
            line.dirty |= dirty;
            return AccessResult::hit();
        }

        let victim = self.choose_victim(addr.set);
        self.install(addr, victim, dirty)
    }

    /// Looks up the block holding `byte_addr` without touching LRU or
    /// statistics.
    pub fn probe(&self, byte_addr: u64) -> Option<LineView> {
        let addr = self.split_addr(byte_addr);
        let way = self.find_way(addr)?;
        let line = &self.lines[addr.set * self.geometry.n_ways + way];
        Some(LineView {
            way,
            tag: line.tag,
            dirty: line.dirty,
            last_use: line.last_use,
        })
    }

    pub fn contains_block(&self, block_addr: u64) -> bool {
        self.probe(block_addr << self.geometry.offset_bits).is_some()
    }

    pub fn resident_lines(&self) -> usize {
        self.lines.iter().filter(|l| l.valid).count()
    }

    /// Block addresses of every valid line, in set then way order.
    pub fn resident_blocks(&self) -> impl Iterator<Item = u64> + '_ {
        self.lines.iter().enumerate().filter(|(_, l)| l.valid).map(move |(idx, l)| {
            self.block_addr_of(l.tag, idx / self.num_ways())
        })
    }
}
