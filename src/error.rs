use std::{io, path::PathBuf};

/// A cache level whose geometry or policy cannot be simulated.
///
/// Every variant names the offending level so a two-level setup can report
/// which side is broken.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{name}: size/block/assoc must be > 0 (size={size_bytes}, block={block_bytes}, assoc={assoc})")]
    ZeroGeometry {
        name: String,
        size_bytes: usize,
        block_bytes: usize,
        assoc: usize,
    },
    #[error("{name}: block_bytes must be power-of-two (got {block_bytes})")]
    BlockNotPowerOfTwo { name: String, block_bytes: usize },
    #[error("{name}: size_bytes must be multiple of block_bytes ({size_bytes} % {block_bytes} != 0)")]
    SizeNotBlockMultiple {
        name: String,
        size_bytes: usize,
        block_bytes: usize,
    },
    #[error("{name}: num_lines must be divisible by assoc ({lines} % {assoc} != 0)")]
    LinesNotDivisible {
        name: String,
        lines: usize,
        assoc: usize,
    },
    #[error("{name}: num_sets must be power-of-two (got {sets})")]
    SetsNotPowerOfTwo { name: String, sets: usize },
    #[error("{name}: only repl=lru supported (got {repl:?})")]
    UnsupportedReplacement { name: String, repl: String },
}

impl ConfigError {
    /// Name of the cache level that failed validation.
    pub fn level(&self) -> &str {
        match self {
            Self::ZeroGeometry { name, .. }
            | Self::BlockNotPowerOfTwo { name, .. }
            | Self::SizeNotBlockMultiple { name, .. }
            | Self::LinesNotDivisible { name, .. }
            | Self::SetsNotPowerOfTwo { name, .. }
            | Self::UnsupportedReplacement { name, .. } => name,
        }
    }
}

/// Failures of the simulator driver (everything outside the cache engine).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("trace or output file: {0}")]
    Io(#[from] io::Error),
    #[error("config file {}: {source}", path.display())]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("--config and -p are mutually exclusive")]
    ConfigConflict,
    #[error("bad json config: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Args(#[from] pico_args::Error),
    #[error("Missing --trace <file>")]
    MissingTrace,
    #[error("Unknown arg: {0}")]
    UnknownArg(String),
    #[error("sweep point {index} failed: {source}")]
    Sweep {
        index: usize,
        #[source]
        source: ConfigError,
    },
}
