use std::path::PathBuf;

use thiserror::Error;

/// Fatal conditions raised by the harness. Missing score lines and missing
/// lookback baselines are deliberately absent: they are values, not errors.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("{tool} failed: {status}")]
    ToolchainFailure { tool: String, status: String },

    #[error("input file name is not a numeric index: {name}")]
    InvalidInputName { name: String },

    #[error("input index {index} out of range (seed list has {len} entries)")]
    SeedIndexOutOfRange { index: usize, len: usize },

    #[error("malformed input {path}: {reason}")]
    MalformedInput { path: PathBuf, reason: String },

    #[error("corrupt history file {path}: {reason}")]
    CorruptHistory { path: PathBuf, reason: String },

    #[error("corrupt comparison file {path}: {reason}")]
    CorruptComparison { path: PathBuf, reason: String },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("score {score} for seed {seed} is not a new record")]
    NotARecord { seed: String, score: i64 },
}
