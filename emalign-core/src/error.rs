//! Error handling shared across the crate.

use std::path::PathBuf;

use thiserror::Error;

/// Convenient result type used throughout the crate.
pub type Result<T, E = AlignError> = std::result::Result<T, E>;

/// Failures during configuration, corpus reading, or training.
#[derive(Debug, Error)]
pub enum AlignError {
    /// An option combination or config file failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A corpus line that cannot be used for training.
    #[error("line {line}: {reason}\n{text}")]
    Corpus {
        /// 1-based line number in the input file.
        line: u64,
        /// What was wrong with the line.
        reason: String,
        /// The offending line, as read.
        text: String,
    },
    /// Filesystem IO error with optional context path.
    #[error("io error while processing {path:?}: {source}")]
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },
}

impl AlignError {
    /// Wraps an IO error, attaching the path when one is known.
    pub fn io(source: std::io::Error, path: Option<PathBuf>) -> Self {
        Self::Io { source, path }
    }
}
