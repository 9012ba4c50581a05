use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, hierarchy::CacheHierarchy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    WriteBack,
    WriteThrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocatePolicy {
    WriteAllocate,
    NoWriteAllocate,
}

/// Configuration of a single cache level.
///
/// Nothing is checked here; [`CacheConfig::validate`] (called by
/// [`Cache::new`](crate::cache::Cache::new)) turns it into a [`Geometry`] or a [`ConfigError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheConfig {
    pub name: String,
    pub size_bytes: usize,
    pub block_bytes: usize,
    pub assoc: usize,
    pub write_policy: WritePolicy,
    pub allocate_policy: AllocatePolicy,
    pub repl: String,
    /// Prefetch buffer entries, 0 disables the buffer.
    pub prefetch_buf_entries: usize,
    pub next_line_prefetch: bool,
}

impl CacheConfig {
    pub fn l1() -> Self {
        CacheConfig {
            name: "L1".to_string(),
            size_bytes: 32 * 1024,
            block_bytes: 64,
            assoc: 8,
            write_policy: WritePolicy::WriteBack,
            allocate_policy: AllocatePolicy::WriteAllocate,
            repl: "lru".to_string(),
            prefetch_buf_entries: 0,
            next_line_prefetch: false,
        }
    }

    pub fn l2() -> Self {
        CacheConfig {
            name: "L2".to_string(),
            size_bytes: 256 * 1024,
            ..CacheConfig::l1()
        }
    }

    pub fn is_write_back(&self) -> bool {
        self.write_policy == WritePolicy::WriteBack
    }

    pub fn is_write_allocate(&self) -> bool {
        self.allocate_policy == AllocatePolicy::WriteAllocate
    }

    /// Checks the level's geometry and derives the address split.
    pub fn validate(&self) -> Result<Geometry, ConfigError> {
        let name = || self.name.clone();

        if self.size_bytes == 0 || self.block_bytes == 0 || self.assoc == 0 {
            return Err(ConfigError::ZeroGeometry {
                name: name(),
                size_bytes: self.size_bytes,
                block_bytes: self.block_bytes,
                assoc: self.assoc,
            });
        }
        if !self.block_bytes.is_power_of_two() {
            return Err(ConfigError::BlockNotPowerOfTwo {
                name: name(),
                block_bytes: self.block_bytes,
            });
        }
        if self.size_bytes % self.block_bytes != 0 {
            return Err(ConfigError::SizeNotBlockMultiple {
                name: name(),
                size_bytes: self.size_bytes,
                block_bytes: self.block_bytes,
            });
        }

        let lines = self.size_bytes / self.block_bytes;
        if lines % self.assoc != 0 {
            return Err(ConfigError::LinesNotDivisible {
                name: name(),
                lines,
                assoc: self.assoc,
            });
        }

        let n_sets = lines / self.assoc;
        if !n_sets.is_power_of_two() {
            return Err(ConfigError::SetsNotPowerOfTwo {
                name: name(),
                sets: n_sets,
            });
        }

        if !self.repl.eq_ignore_ascii_case("lru") {
            return Err(ConfigError::UnsupportedReplacement {
                name: name(),
                repl: self.repl.clone(),
            });
        }

        Ok(Geometry {
            n_sets,
            n_ways: self.assoc,
            offset_bits: self.block_bytes.ilog2(),
            index_bits: n_sets.ilog2(),
        })
    }
}

/// Address split of a validated cache level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub n_sets: usize,
    pub n_ways: usize,
    pub offset_bits: u32,
    pub index_bits: u32,
}

/// Per-level overrides; `None` keeps whatever the base configuration says.
///
/// JSON documents and command line flags are both read into this shape and
/// then layered over the level defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfigPatch {
    pub name: Option<String>,
    pub size_bytes: Option<usize>,
    pub block_bytes: Option<usize>,
    pub assoc: Option<usize>,
    pub write_policy: Option<WritePolicy>,
    pub allocate_policy: Option<AllocatePolicy>,
    pub repl: Option<String>,
    pub prefetch_buf_entries: Option<usize>,
    pub next_line_prefetch: Option<bool>,
}

impl CacheConfigPatch {
    pub fn apply(&self, cfg: &mut CacheConfig) {
        if let Some(name) = &self.name {
            cfg.name = name.clone();
        }
        if let Some(repl) = &self.repl {
            cfg.repl = repl.clone();
        }
        cfg.size_bytes = self.size_bytes.unwrap_or(cfg.size_bytes);
        cfg.block_bytes = self.block_bytes.unwrap_or(cfg.block_bytes);
        cfg.assoc = self.assoc.unwrap_or(cfg.assoc);
        cfg.write_policy = self.write_policy.unwrap_or(cfg.write_policy);
        cfg.allocate_policy = self.allocate_policy.unwrap_or(cfg.allocate_policy);
        cfg.prefetch_buf_entries = self
            .prefetch_buf_entries
            .unwrap_or(cfg.prefetch_buf_entries);
        cfg.next_line_prefetch = self.next_line_prefetch.unwrap_or(cfg.next_line_prefetch);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HierarchyConfigPatch {
    #[serde(default)]
    pub l1: CacheConfigPatch,
    #[serde(default)]
    pub l2: CacheConfigPatch,
}

impl From<HierarchyConfigPatch> for HierarchyConfig {
    fn from(patch: HierarchyConfigPatch) -> Self {
        let mut cfg = HierarchyConfig::default();
        patch.l1.apply(&mut cfg.l1);
        patch.l2.apply(&mut cfg.l2);
        cfg
    }
}

/// Both levels of the hierarchy, as read from `--config` / `-p`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "HierarchyConfigPatch")]
pub struct HierarchyConfig {
    pub l1: CacheConfig,
    pub l2: CacheConfig,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        HierarchyConfig {
            l1: CacheConfig::l1(),
            l2: CacheConfig::l2(),
        }
    }
}

impl HierarchyConfig {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_hierarchy(&self) -> Result<CacheHierarchy, ConfigError> {
        CacheHierarchy::new(self.l1.clone(), self.l2.clone())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn level(size_bytes: usize, block_bytes: usize, assoc: usize) -> CacheConfig {
        CacheConfig {
            size_bytes,
            block_bytes,
            assoc,
            ..CacheConfig::l1()
        }
    }

    #[test]
    fn defaults_are_valid() {
        let geo = CacheConfig::l1().validate().unwrap();
        assert_eq!(
            geo,
            Geometry {
                n_sets: 64,
                n_ways: 8,
                offset_bits: 6,
                index_bits: 6,
            }
        );
        let geo = CacheConfig::l2().validate().unwrap();
        assert_eq!(geo.n_sets, 512);
        assert_eq!(geo.index_bits, 9);
    }

    #[test]
    fn rejects_zero_geometry() {
        for cfg in [level(0, 64, 1), level(256, 0, 1), level(256, 64, 0)] {
            assert!(matches!(
                cfg.validate(),
                Err(ConfigError::ZeroGeometry { .. })
            ));
        }
    }

    #[test]
    fn rejects_each_broken_invariant() {
        assert!(matches!(
            level(256, 48, 1).validate(),
            Err(ConfigError::BlockNotPowerOfTwo { block_bytes: 48, .. })
        ));
        assert!(matches!(
            level(300, 64, 1).validate(),
            Err(ConfigError::SizeNotBlockMultiple { .. })
        ));
        assert!(matches!(
            level(256, 64, 3).validate(),
            Err(ConfigError::LinesNotDivisible { lines: 4, assoc: 3, .. })
        ));
        assert!(matches!(
            level(384, 64, 2).validate(),
            Err(ConfigError::SetsNotPowerOfTwo { sets: 3, .. })
        ));

        let mut fifo = level(256, 64, 1);
        fifo.repl = "fifo".to_string();
        assert!(matches!(
            fifo.validate(),
            Err(ConfigError::UnsupportedReplacement { .. })
        ));
    }

    #[test]
    fn repl_is_case_insensitive() {
        let mut cfg = level(256, 64, 1);
        cfg.repl = "LRU".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn error_names_the_level() {
        let mut cfg = level(256, 48, 1);
        cfg.name = "L2".to_string();
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.level(), "L2");
        assert!(err.to_string().starts_with("L2: block_bytes must be power-of-two"));
    }

    #[test]
    fn json_fills_missing_fields_with_level_defaults() {
        let cfg = HierarchyConfig::from_json(
            r#"{
                "l1": { "size_bytes": 16384, "assoc": 4, "allocate_policy": "no_write_allocate" },
                "l2": { "write_policy": "write_through", "prefetch_buf_entries": 8, "next_line_prefetch": true }
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.l1.name, "L1");
        assert_eq!(cfg.l1.size_bytes, 16384);
        assert_eq!(cfg.l1.block_bytes, 64);
        assert_eq!(cfg.l1.assoc, 4);
        assert_eq!(cfg.l1.allocate_policy, AllocatePolicy::NoWriteAllocate);

        assert_eq!(cfg.l2.name, "L2");
        assert_eq!(cfg.l2.size_bytes, 256 * 1024);
        assert_eq!(cfg.l2.write_policy, WritePolicy::WriteThrough);
        assert_eq!(cfg.l2.prefetch_buf_entries, 8);
        assert!(cfg.l2.next_line_prefetch);
    }

    #[test]
    fn json_missing_level_uses_level_default() {
        let cfg = HierarchyConfig::from_json(r#"{ "l1": { "assoc": 2 } }"#).unwrap();
        assert_eq!(cfg.l1.assoc, 2);
        assert_eq!(cfg.l2, CacheConfig::l2());
    }

    #[test]
    fn json_rejects_unknown_keys() {
        assert!(HierarchyConfig::from_json(r#"{ "l3": {} }"#).is_err());
        assert!(HierarchyConfig::from_json(r#"{ "l1": { "ways": 4 } }"#).is_err());
    }

    #[test]
    fn patch_only_touches_given_fields() {
        let mut cfg = CacheConfig::l2();
        CacheConfigPatch {
            assoc: Some(16),
            write_policy: Some(WritePolicy::WriteThrough),
            ..Default::default()
        }
        .apply(&mut cfg);
        assert_eq!(cfg.assoc, 16);
        assert_eq!(cfg.write_policy, WritePolicy::WriteThrough);
        assert_eq!(cfg.size_bytes, CacheConfig::l2().size_bytes);
        assert_eq!(cfg.name, "L2");
    }
}
