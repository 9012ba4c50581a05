use std::{fmt, io};

use serde::Serialize;

use crate::{
    cache::{Cache, CacheStats},
    hierarchy::CacheHierarchy,
    prefetch::PrefetchStats,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelReport {
    pub name: String,
    pub hits: u64,
    pub misses: u64,
    pub miss_rate: f64,
    pub evictions: u64,
    pub writebacks: u64,
    pub prefetch_issued: u64,
    /// Demand hits in the prefetch buffer, as seen by the hierarchy.
    pub pfb_hits: u64,
    pub pfb_drops: u64,
    pub stats: CacheStats,
    pub prefetch: PrefetchStats,
}

pub fn miss_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        misses as f64 / total as f64
    }
}

impl LevelReport {
    fn new(cache: &Cache, pfb_hits: u64) -> Self {
        let stats = *cache.stats();
        let prefetch = *cache.prefetch_stats();
        LevelReport {
            name: cache.name().to_string(),
            hits: stats.hits(),
            misses: stats.misses(),
            miss_rate: miss_rate(stats.hits(), stats.misses()),
            evictions: stats.evictions,
            writebacks: stats.writebacks,
            prefetch_issued: prefetch.issued,
            pfb_hits,
            pfb_drops: prefetch.drops,
            stats,
            prefetch,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    /// Trace operations fed to the hierarchy (after warmup).
    pub accesses: u64,
    pub l1: LevelReport,
    pub l2: LevelReport,
}

impl Report {
    pub fn new(hierarchy: &CacheHierarchy, accesses: u64) -> Self {
        let hstats = hierarchy.stats();
        Report {
            accesses,
            l1: LevelReport::new(hierarchy.l1(), hstats.l1_prefetch_dem_hits),
            l2: LevelReport::new(hierarchy.l2(), hstats.l2_prefetch_dem_hits),
        }
    }

    pub fn to_writer_json<W: io::Write>(&self, writer: W) -> serde_json::Result<()> {
        serde_json::to_writer_pretty(writer, self)
    }
}

impl fmt::Display for LevelReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "[{}] hits={} misses={} miss_rate={:.6} evictions={} writebacks={}",
            self.name, self.hits, self.misses, self.miss_rate, self.evictions, self.writebacks
        )?;
        writeln!(
            f,
            "     prefetch_issued={} pfb_hits={} pfb_drops={}",
            self.prefetch_issued, self.pfb_hits, self.pfb_drops
        )
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Results ===")?;
        writeln!(f, "Trace accesses: {}", self.accesses)?;
        writeln!(f)?;
        writeln!(f, "{}", self.l1)?;
        write!(f, "{}", self.l2)
    }
}
