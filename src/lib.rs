//! Two-level set-associative cache hierarchy simulator.
//!
//! [`hierarchy::CacheHierarchy`] is fed one `(Op, address)` pair at a time and
//! keeps per-level hit/miss/eviction/writeback and prefetch statistics.
//! Everything around it (trace files, JSON configuration, reports, parameter
//! sweeps) lives in its own module and never reaches into the engine state.

pub mod cache;
pub mod config;
pub mod error;
pub mod hierarchy;
pub mod prefetch;
pub mod report;
pub mod sim;
pub mod sweep;
pub mod trace;

pub use cache::{AccessResult, Cache, CacheStats, Op};
pub use config::{AllocatePolicy, CacheConfig, HierarchyConfig, WritePolicy};
pub use error::{ConfigError, Error};
pub use hierarchy::{CacheHierarchy, HierarchyStats};
pub use prefetch::{PrefetchBuffer, PrefetchStats};
